use tracing::debug;

use crate::providers::{BackendError, ModelBackend};

const MAX_TITLE_LEN: usize = 50;
const MAX_EXCERPT_CHARS: usize = 500;

/// Truncate text to a short title for conversations.
pub fn truncate_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.len() > MAX_TITLE_LEN {
        let boundary = first_line
            .char_indices()
            .take_while(|(i, _)| *i < MAX_TITLE_LEN - 3)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(MAX_TITLE_LEN - 3);
        format!("{}...", &first_line[..boundary])
    } else {
        first_line.to_string()
    }
}

/// First line of the model's answer, without quotes or surrounding blanks.
/// `None` if nothing usable is left.
pub fn clean_title(raw: &str) -> Option<String> {
    let first_line = raw.trim().lines().next()?;
    let cleaned = first_line
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(truncate_title(cleaned))
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(MAX_EXCERPT_CHARS).collect()
}

pub fn build_title_prompt(user_text: &str, assistant_text: &str) -> String {
    format!(
        "Generate a concise, descriptive title (3-7 words) for this conversation. \
        Output ONLY the title on a single line, no quotes, no explanation.\n\n\
        User: {}\nAssistant: {}",
        excerpt(user_text),
        excerpt(assistant_text)
    )
}

/// Ask `model` for a title summarizing the first exchange.
pub async fn generate_title(
    backend: &dyn ModelBackend,
    model: &str,
    user_text: &str,
    assistant_text: &str,
) -> Result<Option<String>, BackendError> {
    let prompt = build_title_prompt(user_text, assistant_text);
    let session = backend.open_session(model);
    let response = session.complete(&prompt).await?;
    debug!(response = %response, "Title response received");
    Ok(clean_title(&response))
}
