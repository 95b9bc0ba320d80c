use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{BackendError, StreamEvent};

/// Producer half of a `TokenStream`, handed to whatever task talks to the
/// backend.
#[derive(Debug, Clone)]
pub struct StreamFeed {
    pub tx: mpsc::Sender<StreamEvent>,
    pub cancel: CancellationToken,
}

impl StreamFeed {
    /// Returns `false` once the consumer is gone.
    pub async fn send(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Pull-based source of incremental text tokens.
///
/// Tokens come out in the order the producer sent them. The first `Done`
/// or `Error` ends the stream for good; later calls to `next` yield
/// `Ok(None)`. Dropping the stream cancels the producer.
#[derive(Debug)]
pub struct TokenStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl TokenStream {
    pub fn channel(buffer: usize) -> (StreamFeed, TokenStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        let feed = StreamFeed {
            tx,
            cancel: cancel.clone(),
        };
        let stream = TokenStream {
            rx,
            cancel,
            finished: false,
        };
        (feed, stream)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn next(&mut self) -> Result<Option<String>, BackendError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            match self.rx.recv().await {
                Some(StreamEvent::Token(token)) => {
                    if token.is_empty() {
                        continue;
                    }
                    return Ok(Some(token));
                }
                Some(StreamEvent::Done {
                    tokens_in,
                    tokens_out,
                }) => {
                    tracing::debug!(?tokens_in, ?tokens_out, "Token stream finished");
                    self.finished = true;
                    return Ok(None);
                }
                Some(StreamEvent::Error(error)) => {
                    self.finished = true;
                    return Err(BackendError::Stream(error));
                }
                None => {
                    self.finished = true;
                    return Err(BackendError::Disconnected);
                }
            }
        }
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokens_arrive_in_order() {
        let (feed, mut stream) = TokenStream::channel(8);
        for t in ["a", "b", "c"] {
            assert!(feed.send(StreamEvent::Token(t.to_string())).await);
        }
        feed.send(StreamEvent::Done {
            tokens_in: None,
            tokens_out: None,
        })
        .await;

        let mut seen = Vec::new();
        while let Some(token) = stream.next().await.unwrap() {
            seen.push(token);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(stream.is_finished());
        assert_eq!(stream.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let (feed, mut stream) = TokenStream::channel(8);
        feed.send(StreamEvent::Token("partial".to_string())).await;
        feed.send(StreamEvent::Error("model crashed".to_string())).await;
        feed.send(StreamEvent::Token("ignored".to_string())).await;

        assert_eq!(stream.next().await.unwrap().as_deref(), Some("partial"));
        match stream.next().await {
            Err(BackendError::Stream(msg)) => assert_eq!(msg, "model crashed"),
            other => panic!("Expected stream error, got {:?}", other),
        }
        assert_eq!(stream.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_producer_is_an_error() {
        let (feed, mut stream) = TokenStream::channel(1);
        drop(feed);
        assert!(matches!(
            stream.next().await,
            Err(BackendError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let (feed, stream) = TokenStream::channel(1);
        assert!(!feed.cancel.is_cancelled());
        drop(stream);
        assert!(feed.cancel.is_cancelled());
        assert!(!feed.send(StreamEvent::Token("late".to_string())).await);
    }
}
