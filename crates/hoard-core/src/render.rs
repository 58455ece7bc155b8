//! On-disk forms of a conversation: pretty JSON and readable Markdown.

use crate::error::Result;
use crate::models::{Attachment, Conversation, Message};

/// Pretty-printed structured form, newline terminated.
pub fn to_json(conversation: &Conversation) -> Result<String> {
    let mut out = serde_json::to_string_pretty(conversation)?;
    out.push('\n');
    Ok(out)
}

/// Human-readable form.
pub fn to_markdown(conversation: &Conversation) -> String {
    let title = if conversation.title.trim().is_empty() {
        "Untitled conversation"
    } else {
        conversation.title.trim()
    };

    let mut out = format!("# {title}\n\n");
    out.push_str(&format!("- **ID:** `{}`\n", conversation.id));
    out.push_str(&format!(
        "- **Created:** {}\n",
        conversation.created_at.to_rfc3339()
    ));
    out.push_str(&format!(
        "- **Updated:** {}\n",
        conversation.updated_at.to_rfc3339()
    ));
    let labels = conversation.hierarchy.labels();
    if !labels.is_empty() {
        out.push_str(&format!("- **Location:** {}\n", labels.join(" / ")));
    }
    out.push_str(&format!("- **Messages:** {}\n", conversation.message_count()));
    let media = conversation.media_count();
    if media > 0 {
        out.push_str(&format!("- **Attachments:** {media}\n"));
    }

    for message in &conversation.messages {
        out.push_str("\n---\n\n");
        render_message(&mut out, message);
    }
    out
}

fn render_message(out: &mut String, message: &Message) {
    let role = capitalize(&message.role.to_string());
    match message.timestamp {
        Some(ts) => out.push_str(&format!("## {role} ({})\n\n", ts.format("%Y-%m-%d %H:%M:%S UTC"))),
        None => out.push_str(&format!("## {role}\n\n")),
    }

    let content = message.content.trim_end();
    if !content.is_empty() {
        out.push_str(content);
        out.push('\n');
    }

    if !message.attachments.is_empty() {
        if !content.is_empty() {
            out.push('\n');
        }
        out.push_str("**Attachments:**\n\n");
        for attachment in &message.attachments {
            out.push_str(&format!("- {}\n", describe(attachment)));
        }
    }
}

fn describe(attachment: &Attachment) -> String {
    let kind = format!("{:?}", attachment.kind).to_lowercase();
    let label = attachment.name.as_deref().unwrap_or(&attachment.id);
    match attachment.remote_url() {
        Some(url) => format!("{kind}: [{label}]({url})"),
        None if attachment.content.is_some() => format!("{kind}: {label} (inline)"),
        None => format!("{kind}: {label}"),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttachmentKind, Hierarchy, MessageRole};
    use chrono::DateTime;

    fn conversation() -> Conversation {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        Conversation {
            id: "c-1".to_string(),
            title: "Rust questions".to_string(),
            created_at: ts,
            updated_at: ts,
            hierarchy: Hierarchy {
                workspace: Some("Work".to_string()),
                project: Some("Hoard".to_string()),
                folder: None,
            },
            messages: vec![
                Message {
                    id: "m1".to_string(),
                    role: MessageRole::User,
                    content: "How do lifetimes work?".to_string(),
                    timestamp: Some(ts),
                    attachments: vec![
                        Attachment::new("a1", AttachmentKind::Image).with_url("https://x/diagram.png"),
                    ],
                },
                Message {
                    id: "m2".to_string(),
                    role: MessageRole::Assistant,
                    content: "They describe how long references stay valid.".to_string(),
                    timestamp: None,
                    attachments: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn markdown_has_header_and_messages() {
        let md = to_markdown(&conversation());
        assert!(md.starts_with("# Rust questions\n"));
        assert!(md.contains("- **ID:** `c-1`"));
        assert!(md.contains("- **Location:** Work / Hoard"));
        assert!(md.contains("## User (2023-11-14 22:13:20 UTC)"));
        assert!(md.contains("## Assistant\n\nThey describe"));
        assert!(md.contains("- image: [a1](https://x/diagram.png)"));
        assert!(md.contains("- **Attachments:** 1"));
    }

    #[test]
    fn untitled_fallback() {
        let mut c = conversation();
        c.title = "  ".to_string();
        assert!(to_markdown(&c).starts_with("# Untitled conversation\n"));
    }

    #[test]
    fn json_is_pretty_and_parses_back() {
        let json = to_json(&conversation()).expect("json");
        assert!(json.contains("\n  \"id\": \"c-1\""));
        assert!(json.ends_with('\n'));
        let back: Conversation = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.messages.len(), 2);
    }
}
