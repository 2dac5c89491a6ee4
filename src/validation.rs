//! Input rules of the composition flow: text length, the HTML tag
//! whitelist, media ceilings and `label | url` button lines.
use crate::error::ValidationError;
use crate::model::MediaKind;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub const MAX_TEXT_CHARS: usize = 4096;
pub const MAX_MEDIA_ITEMS: usize = 10;
pub const MAX_BUTTON_LABEL_CHARS: usize = 64;
pub const MAX_BUTTONS_PER_ROW: usize = 8;

const ALLOWED_TAGS: [&str; 13] = [
    "b", "strong", "i", "em", "u", "ins", "s", "strike", "del", "code", "pre", "a", "spoiler",
];

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\s*(/?)\s*([A-Za-z][A-Za-z0-9-]*)[^>]*>").unwrap());

static SPOILER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*(/?)\s*spoiler\b[^>]*>").unwrap());

/// Post HTML as the Bot API expects it: `<spoiler>` becomes `<tg-spoiler>`.
pub fn platform_html(text: &str) -> String {
    SPOILER_RE.replace_all(text, "<${1}tg-spoiler>").into_owned()
}

/// Non-empty after trimming and at most 4096 characters.
pub fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let actual = text.chars().count();
    if actual > MAX_TEXT_CHARS {
        return Err(ValidationError::TextTooLong {
            actual,
            max: MAX_TEXT_CHARS,
        });
    }
    Ok(())
}

/// Accepts only properly nested whitelisted tags. Closing tags must match
/// the most recently opened one.
pub fn validate_html(text: &str) -> Result<(), ValidationError> {
    let mut stack: Vec<String> = Vec::new();
    for cap in TAG_RE.captures_iter(text) {
        let closing = !cap[1].is_empty();
        let tag = cap[2].to_ascii_lowercase();
        if !ALLOWED_TAGS.contains(&tag.as_str()) {
            return Err(ValidationError::UnknownTag { tag });
        }
        if !closing {
            stack.push(tag);
            continue;
        }
        match stack.pop() {
            Some(open) if open == tag => {}
            Some(open) => {
                return Err(ValidationError::MismatchedClose {
                    expected: open,
                    found: tag,
                })
            }
            None => return Err(ValidationError::UnexpectedClose { tag }),
        }
    }
    match stack.pop() {
        Some(tag) => Err(ValidationError::Unclosed { tag }),
        None => Ok(()),
    }
}

/// Text with all tags removed, for listings and snippets.
pub fn strip_tags(text: &str) -> String {
    TAG_RE.replace_all(text, "").into_owned()
}

/// Full text step check.
pub fn validate_post_text(text: &str) -> Result<(), ValidationError> {
    validate_text(text)?;
    validate_html(text)
}

/// Per-kind size ceiling and the group ceiling for one more item.
pub fn validate_media(
    kind: MediaKind,
    size: Option<u64>,
    current_count: usize,
) -> Result<(), ValidationError> {
    if current_count >= MAX_MEDIA_ITEMS {
        return Err(ValidationError::TooManyMedia {
            max: MAX_MEDIA_ITEMS,
        });
    }
    if let Some(size) = size {
        if size > kind.max_size() {
            return Err(ValidationError::MediaTooLarge {
                kind: kind.label(),
                size,
                max: kind.max_size(),
            });
        }
    }
    Ok(())
}

/// Whether `next` can join an album that already holds `existing`. Albums
/// mix photos and videos, or hold documents only; an animation always
/// stands alone.
pub fn validate_album(existing: &[MediaKind], next: MediaKind) -> Result<(), ValidationError> {
    let visual = |k: MediaKind| matches!(k, MediaKind::Photo | MediaKind::Video);
    let conflict = existing.iter().copied().find(|&k| match next {
        MediaKind::Animation => true,
        MediaKind::Document => k != MediaKind::Document,
        MediaKind::Photo | MediaKind::Video => !visual(k),
    });
    match conflict {
        Some(present) => Err(ValidationError::IncompatibleMedia {
            kind: next.label(),
            present: present.label(),
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonSpec {
    pub label: String,
    pub url: String,
}

/// Parse every non-blank `label | url` line. Nothing is returned unless all
/// lines are valid; line numbers in errors are 1-based.
pub fn parse_buttons(input: &str) -> Result<Vec<ButtonSpec>, ValidationError> {
    let mut out = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let Some((label, url)) = raw.split_once('|') else {
            return Err(ValidationError::ButtonFormat { line });
        };
        let label = label.trim();
        let url = url.trim();
        let len = label.chars().count();
        if len == 0 || len > MAX_BUTTON_LABEL_CHARS {
            return Err(ValidationError::ButtonLabel {
                line,
                max: MAX_BUTTON_LABEL_CHARS,
            });
        }
        match Url::parse(url) {
            Ok(parsed) if parsed.has_host() => {}
            _ => {
                return Err(ValidationError::ButtonUrl {
                    line,
                    url: url.to_string(),
                })
            }
        }
        out.push(ButtonSpec {
            label: label.to_string(),
            url: url.to_string(),
        });
    }
    if out.is_empty() {
        return Err(ValidationError::ButtonFormat { line: 1 });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_length_boundary() {
        assert!(validate_text(&"a".repeat(4096)).is_ok());
        let err = validate_text(&"a".repeat(4097)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TextTooLong {
                actual: 4097,
                max: 4096
            }
        );
        let msg = err.to_string();
        assert!(msg.contains("4097") && msg.contains("4096"));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        assert!(validate_text(&"ж".repeat(4096)).is_ok());
    }

    #[test]
    fn blank_text_is_rejected() {
        assert_eq!(validate_text("  \n "), Err(ValidationError::EmptyText));
    }

    #[test]
    fn nested_whitelisted_tags_pass() {
        assert!(validate_html("<b>Hello</b>").is_ok());
        assert!(validate_html("<b><i>x</i></b> and <a href=\"https://e.com\">link</a>").is_ok());
        assert!(validate_html("<spoiler>s</spoiler><pre><code>c</code></pre>").is_ok());
        assert!(validate_html("no tags, 1 < 2").is_ok());
    }

    #[test]
    fn unknown_tag_is_named() {
        let err = validate_html("<div>x</div>").unwrap_err();
        assert_eq!(err, ValidationError::UnknownTag { tag: "div".into() });
        assert!(err.to_string().contains("div"));
    }

    #[test]
    fn mismatched_close_names_expected_and_found() {
        let err = validate_html("<b><i>x</b></i>").unwrap_err();
        assert_eq!(
            err,
            ValidationError::MismatchedClose {
                expected: "i".into(),
                found: "b".into()
            }
        );
    }

    #[test]
    fn stray_and_unclosed_tags() {
        assert_eq!(
            validate_html("x</u>"),
            Err(ValidationError::UnexpectedClose { tag: "u".into() })
        );
        assert_eq!(
            validate_html("<s>x"),
            Err(ValidationError::Unclosed { tag: "s".into() })
        );
    }

    #[test]
    fn spoilers_are_renamed_for_the_platform() {
        assert_eq!(
            platform_html("a <spoiler>b</spoiler> <b>c</b> <SPOILER >d</ spoiler>"),
            "a <tg-spoiler>b</tg-spoiler> <b>c</b> <tg-spoiler>d</tg-spoiler>"
        );
        assert_eq!(platform_html("1 < 2, no spoilers"), "1 < 2, no spoilers");
    }

    #[test]
    fn strip_tags_keeps_the_words() {
        assert_eq!(strip_tags("<b>Hello</b> <a href=\"https://e.com\">there</a>"), "Hello there");
    }

    #[test]
    fn media_limits() {
        assert!(validate_media(MediaKind::Photo, Some(10 * 1024 * 1024), 0).is_ok());
        assert!(matches!(
            validate_media(MediaKind::Photo, Some(10 * 1024 * 1024 + 1), 0),
            Err(ValidationError::MediaTooLarge { kind: "photo", .. })
        ));
        assert!(validate_media(MediaKind::Video, None, 9).is_ok());
        assert_eq!(
            validate_media(MediaKind::Video, None, 10),
            Err(ValidationError::TooManyMedia { max: 10 })
        );
    }

    #[test]
    fn album_kinds() {
        use MediaKind::*;
        assert!(validate_album(&[], Animation).is_ok());
        assert!(validate_album(&[Photo, Video], Photo).is_ok());
        assert!(validate_album(&[Document], Document).is_ok());
        assert_eq!(
            validate_album(&[Photo], Document),
            Err(ValidationError::IncompatibleMedia {
                kind: "document",
                present: "photo"
            })
        );
    }

    #[test]
    fn button_lines() {
        let parsed = parse_buttons("Read more | https://example.com\n\nDocs|https://docs.rs/x").unwrap();
        assert_eq!(
            parsed,
            vec![
                ButtonSpec {
                    label: "Read more".into(),
                    url: "https://example.com".into()
                },
                ButtonSpec {
                    label: "Docs".into(),
                    url: "https://docs.rs/x".into()
                },
            ]
        );
    }

    #[test]
    fn one_bad_line_rejects_the_whole_input() {
        assert_eq!(
            parse_buttons("ok | https://a.example\nbroken line"),
            Err(ValidationError::ButtonFormat { line: 2 })
        );
        assert_eq!(
            parse_buttons(&format!("{} | https://a.example", "x".repeat(65))),
            Err(ValidationError::ButtonLabel { line: 1, max: 64 })
        );
        assert!(matches!(
            parse_buttons("Go | /relative/path"),
            Err(ValidationError::ButtonUrl { line: 1, .. })
        ));
        assert!(parse_buttons(&format!("{} | https://a.example", "x".repeat(64))).is_ok());
    }
}
