use crate::calendar::ViewSpan;
use crate::model::PostStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    NewPost,
    EditPost(i64),
    Cancel,
    Drafts,
    Posts(PostStatus),
    Channels,
    RemoveChannel(i64),
    Duplicate(i64),
    Delete(i64),
    Retract(i64),
    Schedule(ViewSpan),
    PublishDue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    NotACommand,
    Command(Command),
    /// Known command with missing or malformed arguments.
    Usage(&'static str),
    Unknown(String),
}

pub const HELP: &str = "\
/newpost – compose a new post
/editpost <id> – edit a draft, scheduled or failed post
/cancel – discard the post being composed
/drafts – list drafts
/posts <draft|scheduled|published|failed> – list posts by status
/schedule [day|week|month] – browse scheduled posts
/duplicate <id> – copy a post into a new draft
/delete <id> – delete a post
/retract <id> – remove a published post from its channel
/channels – list registered channels
/removechannel <id> – stop posting to a channel
/publishdue – deliver due posts now

Forward any message from a channel where I am an administrator to register it.";

fn id_arg(arg: Option<&str>, usage: &'static str, build: fn(i64) -> Command) -> Parsed {
    match arg.and_then(|a| a.parse::<i64>().ok()) {
        Some(id) if id > 0 => Parsed::Command(build(id)),
        _ => Parsed::Usage(usage),
    }
}

/// Parse a slash command. A `@botname` suffix on the command is ignored.
pub fn parse(text: &str) -> Parsed {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix('/') else {
        return Parsed::NotACommand;
    };
    let mut parts = body.split_whitespace();
    let head = parts.next().unwrap_or_default();
    let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts.next();

    match name.as_str() {
        "start" | "help" => Parsed::Command(Command::Help),
        "newpost" => Parsed::Command(Command::NewPost),
        "cancel" => Parsed::Command(Command::Cancel),
        "drafts" => Parsed::Command(Command::Drafts),
        "channels" => Parsed::Command(Command::Channels),
        "publishdue" => Parsed::Command(Command::PublishDue),
        "posts" => match arg.and_then(PostStatus::parse_status) {
            Some(status) => Parsed::Command(Command::Posts(status)),
            None => Parsed::Usage("/posts <draft|scheduled|published|failed>"),
        },
        "schedule" => match arg {
            None => Parsed::Command(Command::Schedule(ViewSpan::Week)),
            Some(a) => match ViewSpan::parse_span(a) {
                Some(span) => Parsed::Command(Command::Schedule(span)),
                None => Parsed::Usage("/schedule [day|week|month]"),
            },
        },
        "editpost" => id_arg(arg, "/editpost <id>", Command::EditPost),
        "removechannel" => id_arg(arg, "/removechannel <id>", Command::RemoveChannel),
        "duplicate" => id_arg(arg, "/duplicate <id>", Command::Duplicate),
        "delete" => id_arg(arg, "/delete <id>", Command::Delete),
        "retract" => id_arg(arg, "/retract <id>", Command::Retract),
        _ => Parsed::Unknown(head.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse("hello /newpost"), Parsed::NotACommand);
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(parse("/editpost 12"), Parsed::Command(Command::EditPost(12)));
        assert_eq!(parse("/retract 3"), Parsed::Command(Command::Retract(3)));
        assert_eq!(
            parse("/posts Scheduled"),
            Parsed::Command(Command::Posts(PostStatus::Scheduled))
        );
        assert_eq!(
            parse("/schedule"),
            Parsed::Command(Command::Schedule(ViewSpan::Week))
        );
        assert_eq!(
            parse("/schedule month"),
            Parsed::Command(Command::Schedule(ViewSpan::Month))
        );
    }

    #[test]
    fn bot_suffix_is_ignored() {
        assert_eq!(parse("/newpost@postbot"), Parsed::Command(Command::NewPost));
    }

    #[test]
    fn bad_arguments_yield_usage() {
        assert_eq!(parse("/delete"), Parsed::Usage("/delete <id>"));
        assert_eq!(parse("/delete abc"), Parsed::Usage("/delete <id>"));
        assert_eq!(parse("/delete -4"), Parsed::Usage("/delete <id>"));
        assert_eq!(
            parse("/posts archived"),
            Parsed::Usage("/posts <draft|scheduled|published|failed>")
        );
        assert_eq!(parse("/frobnicate"), Parsed::Unknown("frobnicate".into()));
    }
}
