//! Routed fragment streams.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::adapter::FragmentStream;
use crate::error::{Error, Result};
use crate::pool::{ModelDescriptor, ProviderKind};

/// Fragments from the model that accepted a streaming call.
///
/// Fallback is over by the time a caller holds this: a failure from here on
/// is yielded once as [`Error::StreamInterrupted`] and the stream ends.
pub struct RoutedStream {
    model_name: String,
    provider: ProviderKind,
    backend_model: String,
    tried: Vec<String>,
    first: Option<String>,
    inner: FragmentStream,
    delivered: usize,
    finished: bool,
}

impl RoutedStream {
    pub(crate) fn new(
        model: &ModelDescriptor,
        tried: Vec<String>,
        first: Option<String>,
        inner: FragmentStream,
    ) -> Self {
        Self {
            model_name: model.name.clone(),
            provider: model.provider,
            backend_model: model.backend_model.clone(),
            tried,
            finished: first.is_none(),
            first,
            inner,
            delivered: 0,
        }
    }

    /// Name of the pool model serving this stream.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn backend_model(&self) -> &str {
        &self.backend_model
    }

    /// Models attempted before the stream opened; the last one is serving it.
    pub fn tried(&self) -> &[String] {
        &self.tried
    }

    /// Fragments yielded so far.
    pub fn fragments_delivered(&self) -> usize {
        self.delivered
    }
}

impl std::fmt::Debug for RoutedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedStream")
            .field("model_name", &self.model_name)
            .field("provider", &self.provider)
            .field("backend_model", &self.backend_model)
            .field("tried", &self.tried)
            .field("delivered", &self.delivered)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Stream for RoutedStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(first) = this.first.take() {
            this.delivered += 1;
            return Poll::Ready(Some(Ok(first)));
        }
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(fragment))) => {
                this.delivered += 1;
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(source))) => {
                this.finished = true;
                tracing::warn!(
                    model = %this.model_name,
                    fragments_delivered = this.delivered,
                    error = %source,
                    "Stream interrupted, not falling back"
                );
                Poll::Ready(Some(Err(Error::StreamInterrupted {
                    model: this.model_name.clone(),
                    fragments_delivered: this.delivered,
                    source,
                })))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Blocking iterator over a [`RoutedStream`].
///
/// Owns the runtime the stream was opened on, since the underlying HTTP body
/// and timers are bound to it.
pub struct BlockingStream {
    runtime: tokio::runtime::Runtime,
    stream: RoutedStream,
}

impl BlockingStream {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, stream: RoutedStream) -> Self {
        Self { runtime, stream }
    }

    pub fn model_name(&self) -> &str {
        self.stream.model_name()
    }

    pub fn provider(&self) -> ProviderKind {
        self.stream.provider()
    }

    pub fn tried(&self) -> &[String] {
        self.stream.tried()
    }
}

impl Iterator for BlockingStream {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvocationError;
    use crate::pool::Mode;

    fn model() -> ModelDescriptor {
        ModelDescriptor::new("m1", "gpt-4o", Mode::Cloud)
    }

    fn fragments(items: Vec<std::result::Result<String, InvocationError>>) -> FragmentStream {
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn test_first_fragment_then_rest() {
        let stream = RoutedStream::new(
            &model(),
            vec!["m1".to_string()],
            Some("a".to_string()),
            fragments(vec![Ok("b".to_string()), Ok("c".to_string())]),
        );
        let out: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_debug_shows_attribution() {
        let stream = RoutedStream::new(
            &model(),
            vec!["m0".to_string(), "m1".to_string()],
            Some("a".to_string()),
            fragments(vec![]),
        );
        let printed = format!("{:?}", stream);
        assert!(printed.contains("\"m1\""));
        assert!(printed.contains("\"gpt-4o\""));
        assert!(printed.contains("[\"m0\", \"m1\"]"));
        assert!(printed.contains("delivered: 0"));
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let mut stream = RoutedStream::new(
            &model(),
            vec!["m1".to_string()],
            Some("a".to_string()),
            fragments(vec![
                Ok("b".to_string()),
                Err(InvocationError::Transport("reset".to_string())),
                Ok("after".to_string()),
            ]),
        );

        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert_eq!(stream.next().await.unwrap().unwrap(), "b");
        match stream.next().await {
            Some(Err(Error::StreamInterrupted {
                model,
                fragments_delivered,
                ..
            })) => {
                assert_eq!(model, "m1");
                assert_eq!(fragments_delivered, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut stream = RoutedStream::new(&model(), vec!["m1".to_string()], None, fragments(vec![]));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.fragments_delivered(), 0);
    }
}
