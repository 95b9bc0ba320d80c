use futures::StreamExt;

use super::models::OllamaChatChunk;
use crate::providers::token_stream::StreamFeed;
use crate::providers::types::StreamEvent;

/// Splits a chunked byte body into complete lines. Partial UTF-8 sequences
/// and partial lines are held back until the next chunk arrives.
#[derive(Debug, Default)]
pub struct LineDecoder {
    byte_buf: Vec<u8>,
    buffer: String,
}

impl LineDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.byte_buf.extend_from_slice(bytes);

        let valid_up_to = match std::str::from_utf8(&self.byte_buf) {
            Ok(s) => s.len(),
            // Invalid bytes (not just a truncated sequence) are replaced rather than stalling.
            Err(e) if e.error_len().is_some() => self.byte_buf.len(),
            Err(e) => e.valid_up_to(),
        };
        if valid_up_to > 0 {
            let decoded = String::from_utf8_lossy(&self.byte_buf[..valid_up_to]).into_owned();
            self.byte_buf.drain(..valid_up_to);
            self.buffer.push_str(&decoded);
        }

        let mut lines = Vec::new();
        while let Some(end) = self.buffer.find('\n') {
            let line = self.buffer[..end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=end);
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if !self.byte_buf.is_empty() {
            let rest = String::from_utf8_lossy(&self.byte_buf).into_owned();
            self.byte_buf.clear();
            self.buffer.push_str(&rest);
        }
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// Translate one NDJSON line into stream events. A final chunk may carry
/// both trailing content and the done flag.
pub fn parse_line(line: &str) -> Vec<StreamEvent> {
    let chunk = match serde_json::from_str::<OllamaChatChunk>(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!("Failed to parse Ollama stream line: {}", e);
            return Vec::new();
        }
    };

    if let Some(error) = chunk.error {
        return vec![StreamEvent::Error(error)];
    }

    let mut events = Vec::new();
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            events.push(StreamEvent::Token(message.content));
        }
    }
    if chunk.done {
        events.push(StreamEvent::Done {
            tokens_in: chunk.prompt_eval_count,
            tokens_out: chunk.eval_count,
        });
    }
    events
}

enum LineResult {
    Continue,
    /// `None` once the consumer has gone away.
    Finished(Option<StreamEvent>),
}

async fn forward_line(line: &str, feed: &StreamFeed) -> LineResult {
    for event in parse_line(line) {
        match event {
            StreamEvent::Token(token) => {
                if !feed.send(StreamEvent::Token(token)).await {
                    return LineResult::Finished(None);
                }
            }
            terminal => return LineResult::Finished(Some(terminal)),
        }
    }
    LineResult::Continue
}

/// Forward tokens from an NDJSON chat body into `feed` until the body ends,
/// a terminal chunk arrives, or the feed is cancelled. Returns the terminal
/// event for the caller to deliver, or `None` if the consumer is gone.
pub async fn read_ndjson_stream(
    response: reqwest::Response,
    feed: &StreamFeed,
) -> Option<StreamEvent> {
    let mut stream = response.bytes_stream();
    let mut decoder = LineDecoder::default();

    loop {
        let chunk = tokio::select! {
            _ = feed.cancel.cancelled() => {
                tracing::debug!("Reply cancelled, closing response body");
                return None;
            }
            chunk = stream.next() => chunk,
        };

        let lines = match chunk {
            Some(Ok(bytes)) => decoder.push(&bytes),
            Some(Err(e)) => return Some(StreamEvent::Error(format!("Stream error: {}", e))),
            None => break,
        };

        for line in lines {
            if let LineResult::Finished(event) = forward_line(&line, feed).await {
                return event;
            }
        }
    }

    if let Some(line) = decoder.finish() {
        if let LineResult::Finished(event) = forward_line(&line, feed).await {
            return event;
        }
    }

    // Body ended without a done chunk; treat what we have as complete.
    Some(StreamEvent::Done {
        tokens_in: None,
        tokens_out: None,
    })
}
