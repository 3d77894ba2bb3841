//! Message assembly
//!
//! Turns rendered template text into a list of role-tagged messages:
//! 1. Split on role and history markers into message sources
//! 2. Split each text source on media and section markers into parts
//! 3. Insert caller-supplied history exactly once

use serde_json::Value;

use crate::markers::{
    split_by_media_and_section, split_by_role_and_history, Piece, HISTORY_MARKER_PREFIX,
    MEDIA_MARKER_PREFIX, ROLE_MARKER_PREFIX, SECTION_MARKER_PREFIX,
};
use crate::types::{DataArgument, Message, Metadata, Part, Role, HISTORY_PURPOSE, PURPOSE_KEY};

/// Errors raised for malformed markers in rendered text
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MessageError {
    #[error("invalid media piece: {piece}; expected 2 or 3 fields, found {found}")]
    MediaFields { piece: String, found: usize },

    #[error("invalid section piece: {piece}; expected 2 fields, found {found}")]
    SectionFields { piece: String, found: usize },

    #[error("invalid role marker: {0}")]
    Role(#[from] crate::types::UnknownRole),
}

/// A message under construction: either raw template text or typed content
/// carried over from history.
#[derive(Debug)]
struct MessageSource {
    role: Role,
    source: String,
    content: Option<Vec<Part>>,
    metadata: Option<Metadata>,
}

impl MessageSource {
    fn new(role: Role) -> Self {
        Self {
            role,
            source: String::new(),
            content: None,
            metadata: None,
        }
    }
}

/// Convert rendered template text into messages.
pub fn to_messages(rendered: &str, data: Option<&DataArgument>) -> Result<Vec<Message>, MessageError> {
    let history = data.map(|d| d.messages.as_slice()).unwrap_or_default();
    let mut sources = vec![MessageSource::new(Role::User)];

    for piece in split_by_role_and_history(rendered) {
        match piece {
            Piece::Marker(marker) if marker.starts_with(ROLE_MARKER_PREFIX) => {
                let role: Role = marker[ROLE_MARKER_PREFIX.len()..].parse()?;
                // `sources` starts non-empty and only grows.
                let Some(current) = sources.last_mut() else {
                    continue;
                };
                if current.source.trim().is_empty() {
                    current.role = role;
                } else {
                    sources.push(MessageSource::new(role));
                }
            }
            Piece::Marker(marker) if marker.starts_with(HISTORY_MARKER_PREFIX) => {
                sources.extend(mark_as_history(history).into_iter().map(|msg| MessageSource {
                    role: msg.role,
                    source: String::new(),
                    content: Some(msg.content),
                    metadata: msg.metadata,
                }));
                sources.push(MessageSource::new(Role::Model));
            }
            Piece::Marker(text) | Piece::Text(text) => {
                if let Some(current) = sources.last_mut() {
                    current.source.push_str(text);
                }
            }
        }
    }

    let messages = sources_to_messages(sources)?;
    Ok(insert_history(messages, history))
}

fn sources_to_messages(sources: Vec<MessageSource>) -> Result<Vec<Message>, MessageError> {
    let mut messages = Vec::with_capacity(sources.len());

    for source in sources {
        let content = match source.content {
            Some(content) => content,
            None if source.source.trim().is_empty() => continue,
            None => to_parts(&source.source)?,
        };
        messages.push(Message {
            role: source.role,
            content,
            metadata: source.metadata,
        });
    }

    Ok(messages)
}

/// Copy messages, tagging each with `purpose: history`.
fn mark_as_history(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .cloned()
        .map(|mut msg| {
            msg.metadata
                .get_or_insert_with(Metadata::new)
                .insert(PURPOSE_KEY.to_string(), Value::String(HISTORY_PURPOSE.to_string()));
            msg
        })
        .collect()
}

/// Insert history into a conversation unless it is already present.
///
/// History goes right before the final message when that message is from the
/// user, so the newest user turn stays last; otherwise it is appended. Inserted
/// messages are tagged so a second call is a no-op.
pub fn insert_history(mut messages: Vec<Message>, history: &[Message]) -> Vec<Message> {
    if history.is_empty() || messages.iter().any(Message::is_history) {
        return messages;
    }

    let history = mark_as_history(history);
    if messages.is_empty() {
        return history;
    }

    if messages.last().is_some_and(|m| m.role == Role::User) {
        let at = messages.len() - 1;
        messages.splice(at..at, history);
    } else {
        messages.extend(history);
    }
    messages
}

/// Split a text source into text, media and pending parts.
fn to_parts(source: &str) -> Result<Vec<Part>, MessageError> {
    split_by_media_and_section(source)
        .into_iter()
        .map(|piece| match piece {
            Piece::Marker(marker) if marker.starts_with(MEDIA_MARKER_PREFIX) => parse_media_part(marker),
            Piece::Marker(marker) if marker.starts_with(SECTION_MARKER_PREFIX) => parse_section_part(marker),
            Piece::Marker(text) | Piece::Text(text) => Ok(Part::text(text)),
        })
        .collect()
}

/// `<<<dotprompt:media:url URL [CONTENT_TYPE]` (closing `>>>` already removed).
fn parse_media_part(piece: &str) -> Result<Part, MessageError> {
    let fields: Vec<&str> = piece.split(' ').collect();
    match fields.as_slice() {
        [_, url] => Ok(Part::media(*url, None)),
        [_, url, content_type] => {
            let content_type = Some(content_type.to_string()).filter(|ct| !ct.trim().is_empty());
            Ok(Part::media(*url, content_type))
        }
        _ => Err(MessageError::MediaFields {
            piece: piece.to_string(),
            found: fields.len(),
        }),
    }
}

/// `<<<dotprompt:section NAME` becomes a pending part whose purpose is NAME.
fn parse_section_part(piece: &str) -> Result<Part, MessageError> {
    let fields: Vec<&str> = piece.split(' ').collect();
    let [_, name] = fields.as_slice() else {
        return Err(MessageError::SectionFields {
            piece: piece.to_string(),
            found: fields.len(),
        });
    };

    let mut part = Part::pending();
    part.set_metadata(PURPOSE_KEY, Value::String(name.trim().to_string()));
    Ok(part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn history_data() -> DataArgument {
        DataArgument {
            messages: vec![
                Message::text(Role::User, "earlier question"),
                Message::text(Role::Model, "earlier answer"),
            ],
            ..DataArgument::default()
        }
    }

    #[test]
    fn test_role_markers_split_messages() {
        let messages =
            to_messages("<<<dotprompt:role:system>>>Be terse.<<<dotprompt:role:user>>>Hi", None).unwrap();
        assert_eq!(
            messages,
            vec![
                Message::text(Role::System, "Be terse."),
                Message::text(Role::User, "Hi"),
            ]
        );
    }

    #[test]
    fn test_plain_text_is_one_user_message() {
        let messages = to_messages("Hello world", None).unwrap();
        assert_eq!(messages, vec![Message::text(Role::User, "Hello world")]);
    }

    #[test]
    fn test_consecutive_role_markers_do_not_create_empty_turns() {
        let messages = to_messages(
            "<<<dotprompt:role:user>>>\n<<<dotprompt:role:model>>>Sure.",
            None,
        )
        .unwrap();
        assert_eq!(messages, vec![Message::text(Role::Model, "Sure.")]);
    }

    #[test]
    fn test_unknown_role_is_an_error() {
        let err = to_messages("<<<dotprompt:role:wizard>>>hi", None).unwrap_err();
        assert!(matches!(err, MessageError::Role(_)));
    }

    #[test]
    fn test_empty_render_yields_no_messages() {
        assert!(to_messages("   \n ", None).unwrap().is_empty());
    }

    #[test]
    fn test_history_marker_splices_history() {
        let data = history_data();
        let messages = to_messages(
            "<<<dotprompt:role:system>>>Be nice.<<<dotprompt:history>>><<<dotprompt:role:user>>>New question",
            Some(&data),
        )
        .unwrap();

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Model, Role::User]);
        assert!(messages[1].is_history());
        assert!(messages[2].is_history());
        assert!(!messages[3].is_history());
        assert_eq!(messages[3].content, vec![Part::text("New question")]);
    }

    #[test]
    fn test_history_without_marker_goes_before_last_user_message() {
        let data = history_data();
        let messages = to_messages(
            "<<<dotprompt:role:system>>>Sys<<<dotprompt:role:user>>>Now",
            Some(&data),
        )
        .unwrap();

        let texts: Vec<&str> = messages
            .iter()
            .map(|m| m.content[0].as_text().unwrap())
            .collect();
        assert_eq!(texts, vec!["Sys", "earlier question", "earlier answer", "Now"]);
    }

    #[test]
    fn test_history_appended_after_model_message() {
        let messages = insert_history(
            vec![Message::text(Role::Model, "last")],
            &history_data().messages,
        );
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, vec![Part::text("last")]);
    }

    #[test]
    fn test_insert_history_is_idempotent() {
        let history = history_data().messages;
        let once = insert_history(vec![Message::text(Role::User, "Now")], &history);
        let twice = insert_history(once.clone(), &history);

        assert_eq!(once.len(), 3);
        assert_eq!(once, twice);
        assert_eq!(once.last().unwrap().content, vec![Part::text("Now")]);
    }

    #[test]
    fn test_insert_history_into_empty_list() {
        let history = history_data().messages;
        let messages = insert_history(Vec::new(), &history);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(Message::is_history));
    }

    #[test]
    fn test_history_keeps_existing_metadata() {
        let mut msg = Message::text(Role::User, "q");
        msg.metadata = Some(serde_json::from_value(json!({"id": 7})).unwrap());
        let messages = insert_history(Vec::new(), &[msg]);
        assert_eq!(
            messages[0].metadata,
            Some(serde_json::from_value(json!({"id": 7, "purpose": "history"})).unwrap())
        );
    }

    #[test]
    fn test_media_markers() {
        let messages = to_messages(
            "Look <<<dotprompt:media:url https://x/y.png image/png>>> and <<<dotprompt:media:url https://x/z.png>>>",
            None,
        )
        .unwrap();

        assert_eq!(
            messages[0].content,
            vec![
                Part::text("Look "),
                Part::media("https://x/y.png", Some("image/png".into())),
                Part::text(" and "),
                Part::media("https://x/z.png", None),
            ]
        );
    }

    #[test]
    fn test_media_marker_with_extra_fields_is_an_error() {
        let cases = [
            ("<<<dotprompt:media:url https://x/y.png image/png extra", 4),
            ("<<<dotprompt:media:url https://x/y.png a b c", 5),
            ("<<<dotprompt:media:url a b c d e", 6),
        ];
        for (piece, found) in cases {
            let err = to_messages(&format!("{piece}>>>"), None).unwrap_err();
            assert_eq!(
                err,
                MessageError::MediaFields {
                    piece: piece.into(),
                    found,
                }
            );
        }
    }

    #[test]
    fn test_section_marker_becomes_pending_part() {
        let messages = to_messages("Intro <<<dotprompt:section examples>>>", None).unwrap();
        let section = &messages[0].content[1];

        assert!(section.is_pending());
        assert_eq!(
            section.metadata().and_then(|m| m.get(PURPOSE_KEY)),
            Some(&json!("examples"))
        );
    }

    #[test]
    fn test_text_is_not_unescaped() {
        let messages = to_messages("a &amp; b <tag>", None).unwrap();
        assert_eq!(messages[0].content, vec![Part::text("a &amp; b <tag>")]);
    }
}
