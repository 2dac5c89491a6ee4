//! Callback actions of the interactive menus.
//!
//! Each action has a compact textual form that fits the platform's 64-byte
//! callback payload, e.g. `ch:5`, `tm:quick`, `dt:2026-10-16`, `po:dup:12`.
//! Payloads are decoded once, at the update boundary.
use crate::calendar::ViewSpan;
use crate::draft::EditField;
use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeChoice {
    Now,
    Pick,
    Quick,
    Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewChoice {
    Confirm,
    Edit,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Edit,
    Duplicate,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Channel(i64),
    MediaDone,
    ButtonsDone,
    Time(TimeChoice),
    Date(NaiveDate),
    Hour(u32),
    Minute(u32),
    Preview(PreviewChoice),
    Edit(EditField),
    BackToPreview,
    Cancel,
    Post(PostAction, i64),
    Schedule(ViewSpan, NaiveDate),
    /// Inert header buttons.
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised callback payload `{0}`")]
pub struct ParseActionError(String);

const DATE_FMT: &str = "%Y-%m-%d";

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Channel(id) => write!(f, "ch:{}", id),
            Action::MediaDone => f.write_str("md"),
            Action::ButtonsDone => f.write_str("bd"),
            Action::Time(choice) => {
                let s = match choice {
                    TimeChoice::Now => "now",
                    TimeChoice::Pick => "pick",
                    TimeChoice::Quick => "quick",
                    TimeChoice::Draft => "draft",
                };
                write!(f, "tm:{}", s)
            }
            Action::Date(d) => write!(f, "dt:{}", d.format(DATE_FMT)),
            Action::Hour(h) => write!(f, "hr:{}", h),
            Action::Minute(m) => write!(f, "mn:{}", m),
            Action::Preview(choice) => {
                let s = match choice {
                    PreviewChoice::Confirm => "ok",
                    PreviewChoice::Edit => "edit",
                    PreviewChoice::Cancel => "cancel",
                };
                write!(f, "pv:{}", s)
            }
            Action::Edit(field) => {
                let s = match field {
                    EditField::Channel => "channel",
                    EditField::Text => "text",
                    EditField::Media => "media",
                    EditField::Buttons => "buttons",
                    EditField::Time => "time",
                };
                write!(f, "ed:{}", s)
            }
            Action::BackToPreview => f.write_str("ed:back"),
            Action::Cancel => f.write_str("cx"),
            Action::Post(action, id) => {
                let s = match action {
                    PostAction::Edit => "edit",
                    PostAction::Duplicate => "dup",
                    PostAction::Delete => "del",
                };
                write!(f, "po:{}:{}", s, id)
            }
            Action::Schedule(span, anchor) => {
                write!(f, "sv:{}:{}", span.as_str(), anchor.format(DATE_FMT))
            }
            Action::Noop => f.write_str("nop"),
        }
    }
}

impl FromStr for Action {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseActionError(s.to_string());
        let (head, rest) = match s.split_once(':') {
            Some((h, r)) => (h, Some(r)),
            None => (s, None),
        };
        let action = match (head, rest) {
            ("md", None) => Action::MediaDone,
            ("bd", None) => Action::ButtonsDone,
            ("cx", None) => Action::Cancel,
            ("nop", None) => Action::Noop,
            ("ch", Some(id)) => Action::Channel(id.parse().map_err(|_| bad())?),
            ("tm", Some(choice)) => Action::Time(match choice {
                "now" => TimeChoice::Now,
                "pick" => TimeChoice::Pick,
                "quick" => TimeChoice::Quick,
                "draft" => TimeChoice::Draft,
                _ => return Err(bad()),
            }),
            ("dt", Some(date)) => {
                Action::Date(NaiveDate::parse_from_str(date, DATE_FMT).map_err(|_| bad())?)
            }
            ("hr", Some(h)) => Action::Hour(h.parse().map_err(|_| bad())?),
            ("mn", Some(m)) => Action::Minute(m.parse().map_err(|_| bad())?),
            ("pv", Some(choice)) => Action::Preview(match choice {
                "ok" => PreviewChoice::Confirm,
                "edit" => PreviewChoice::Edit,
                "cancel" => PreviewChoice::Cancel,
                _ => return Err(bad()),
            }),
            ("ed", Some("back")) => Action::BackToPreview,
            ("ed", Some(field)) => Action::Edit(match field {
                "channel" => EditField::Channel,
                "text" => EditField::Text,
                "media" => EditField::Media,
                "buttons" => EditField::Buttons,
                "time" => EditField::Time,
                _ => return Err(bad()),
            }),
            ("po", Some(rest)) => {
                let (verb, id) = rest.split_once(':').ok_or_else(bad)?;
                let action = match verb {
                    "edit" => PostAction::Edit,
                    "dup" => PostAction::Duplicate,
                    "del" => PostAction::Delete,
                    _ => return Err(bad()),
                };
                Action::Post(action, id.parse().map_err(|_| bad())?)
            }
            ("sv", Some(rest)) => {
                let (span, date) = rest.split_once(':').ok_or_else(bad)?;
                Action::Schedule(
                    ViewSpan::parse_span(span).ok_or_else(bad)?,
                    NaiveDate::parse_from_str(date, DATE_FMT).map_err(|_| bad())?,
                )
            }
            _ => return Err(bad()),
        };
        Ok(action)
    }
}

/// One button of an interactive menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuButton {
    pub label: String,
    pub action: Action,
}

impl MenuButton {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Rows of menu buttons, rendered top to bottom.
pub type Menu = Vec<Vec<MenuButton>>;
