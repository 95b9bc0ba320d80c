use crate::models::{Conversation, Message, Role};

pub fn export_to_markdown(conversation: &Conversation, messages: &[Message]) -> String {
    let mut output = format!("# {}\n\n", conversation.title);
    output.push_str(&format!(
        "> Model: {} | Date: {}\n\n",
        conversation.model,
        conversation.created_at.format("%Y-%m-%d %H:%M")
    ));

    output.push_str("---\n\n");

    for msg in messages {
        let role_label = match msg.role {
            Role::User => "You",
            Role::Assistant => conversation.model.as_str(),
        };
        output.push_str(&format!("### {}\n\n{}\n\n", role_label, msg.content));
    }

    output
}

/// File name derived from the title, safe for common filesystems.
pub fn export_file_name(conversation: &Conversation) -> String {
    format!("{}.md", conversation.title.replace(['/', '\\'], "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_export_to_markdown() {
        let created_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 0).unwrap();
        let conv = Conversation {
            id: 1,
            title: "Greetings / Small talk".to_string(),
            model: "llama3.2:1b".to_string(),
            created_at,
        };
        let messages = vec![
            Message {
                id: 1,
                conversation_id: 1,
                role: Role::User,
                content: "Hello".to_string(),
                created_at,
            },
            Message {
                id: 2,
                conversation_id: 1,
                role: Role::Assistant,
                content: "Hi there!".to_string(),
                created_at,
            },
        ];

        let md = export_to_markdown(&conv, &messages);
        assert!(md.starts_with("# Greetings / Small talk\n\n> Model: llama3.2:1b | Date: 2026-03-14 09:26\n"));
        assert!(md.contains("### You\n\nHello\n\n### llama3.2:1b\n\nHi there!\n\n"));
        assert_eq!(export_file_name(&conv), "Greetings _ Small talk.md");
    }
}
