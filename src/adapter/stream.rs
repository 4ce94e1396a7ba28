//! Streaming body decoding.
//!
//! Provides [`LineDecoder`] for line-buffered extraction of content fragments
//! from OpenAI-compatible SSE and Ollama NDJSON bodies, and
//! [`fragment_stream`] which turns a raw byte stream into a
//! [`FragmentStream`](super::FragmentStream). Handles TCP chunk boundary
//! reassembly correctly.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use super::FragmentStream;
use crate::error::InvocationError;

/// Lines longer than this are discarded rather than buffered forever.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Framing used by a provider's streaming body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `data: {...}` lines, terminated by `data: [DONE]`.
    Sse,
    /// One JSON object per line, terminated by `"done": true`.
    Ndjson,
}

/// Buffers raw bytes across chunk boundaries, reassembles complete lines,
/// and extracts content fragments.
pub(crate) struct LineDecoder {
    format: WireFormat,
    buffer: Vec<u8>,
    done: bool,
}

impl LineDecoder {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Whether the provider's completion marker has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process a chunk of bytes, returning every fragment it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, InvocationError>> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }

        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line, &mut out);
            if self.done {
                self.buffer.clear();
                return out;
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "Discarding oversized stream line"
            );
            self.buffer.clear();
        }

        out
    }

    /// Flush any remaining buffer content as a final line.
    pub fn finish(&mut self) -> Vec<Result<String, InvocationError>> {
        let mut out = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut out);
        }
        out
    }

    fn process_line(&mut self, raw: &[u8], out: &mut Vec<Result<String, InvocationError>>) {
        let Ok(text) = std::str::from_utf8(raw) else {
            tracing::warn!("Skipping non-UTF-8 stream line");
            return;
        };
        let line = text.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return;
        }

        match self.format {
            WireFormat::Sse => self.process_sse_line(line, out),
            WireFormat::Ndjson => self.process_json(line, out),
        }
    }

    fn process_sse_line(&mut self, line: &str, out: &mut Vec<Result<String, InvocationError>>) {
        // event:, id:, retry: and comment lines carry no content
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        self.process_json(data, out);
    }

    fn process_json(&mut self, data: &str, out: &mut Vec<Result<String, InvocationError>>) {
        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed stream line");
                return;
            }
        };

        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            let message = err
                .as_str()
                .or_else(|| err.get("message").and_then(|m| m.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            out.push(Err(InvocationError::Provider(message)));
            self.done = true;
            return;
        }

        let content = match self.format {
            WireFormat::Sse => value
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("delta"))
                .and_then(|d| d.get("content")),
            WireFormat::Ndjson => value.get("message").and_then(|m| m.get("content")),
        };

        if let Some(text) = content.and_then(|c| c.as_str()).filter(|t| !t.is_empty()) {
            out.push(Ok(text.to_string()));
        }

        if self.format == WireFormat::Ndjson
            && value.get("done").and_then(|d| d.as_bool()) == Some(true)
        {
            self.done = true;
        }
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: LineDecoder,
    pending: VecDeque<Result<String, InvocationError>>,
    idle_timeout: Duration,
    finished: bool,
}

/// Decode a streaming body into content fragments.
///
/// Each wait for the next chunk is bounded by `idle_timeout`. A body that ends
/// before the completion marker yields a final `Malformed` error. The stream
/// ends after the first error.
pub(crate) fn fragment_stream<S, E>(
    body: S,
    format: WireFormat,
    idle_timeout: Duration,
) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<InvocationError> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: LineDecoder::new(format),
        pending: VecDeque::new(),
        idle_timeout,
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.pending.clear();
                    st.finished = true;
                }
                return Some((item, st));
            }
            if st.finished || st.decoder.is_done() {
                return None;
            }

            match tokio::time::timeout(st.idle_timeout, st.body.next()).await {
                Err(_) => {
                    st.finished = true;
                    return Some((Err(InvocationError::Timeout(st.idle_timeout)), st));
                }
                Ok(Some(Ok(bytes))) => {
                    let items = st.decoder.push(&bytes);
                    st.pending.extend(items);
                }
                Ok(Some(Err(e))) => {
                    st.finished = true;
                    return Some((Err(e.into()), st));
                }
                Ok(None) => {
                    let items = st.decoder.finish();
                    st.pending.extend(items);
                    if !st.decoder.is_done() {
                        st.pending.push_back(Err(InvocationError::Malformed(
                            "stream ended before completion marker".to_string(),
                        )));
                    }
                    st.finished = true;
                    // drain pending (fragments first, then the trailing error)
                    if let Some(item) = st.pending.pop_front() {
                        return Some((item, st));
                    }
                    return None;
                }
            }
        }
    });

    Box::pin(stream)
}
