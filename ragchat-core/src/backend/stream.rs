//! Decoding of streamed completion bodies into text fragments.
//!
//! A [`FragmentStream`] is lazy, finite and not restartable. It yields
//! `Ok(fragment)` items in arrival order. Running out of items means the
//! stream completed. An `Err` item means it failed, and nothing follows it.

use crate::config::StreamTransport;
use crate::error::BackendError;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Lazy sequence of text fragments from one completion.
pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

/// One decoded unit of a streamed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Done,
    Error(String),
}

/// Incremental UTF-8 decoder that holds back a multi-byte sequence split
/// across chunk boundaries.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // incomplete tail; wait for the next chunk
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Longest SSE line or event accepted before the stream is failed.
pub const MAX_SSE_EVENT_BYTES: usize = 1024 * 1024;

/// Server-sent-events decoder.
///
/// Lines end in `\n`, `\r\n` or a bare `\r`. `data:` lines accumulate until
/// a blank line dispatches the event, joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: Vec<String>,
    data_len: usize,
    after_cr: bool,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                continue;
            }
            match byte {
                b'\n' => self.end_line(&mut frames),
                b'\r' => {
                    self.end_line(&mut frames);
                    self.after_cr = true;
                }
                _ => {
                    if self.line.len() + self.data_len >= MAX_SSE_EVENT_BYTES {
                        self.line.clear();
                        self.data.clear();
                        self.data_len = 0;
                        frames.push(Frame::Error(format!(
                            "SSE event exceeded {MAX_SSE_EVENT_BYTES} bytes"
                        )));
                        return frames;
                    }
                    self.line.push(byte);
                }
            }
        }
        frames
    }

    /// Flush an unterminated last line and dispatch a pending event.
    ///
    /// Bodies that stop without the closing blank line still deliver their
    /// last event.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.line.is_empty() {
            self.end_line(&mut frames);
        }
        frames.extend(self.dispatch());
        frames
    }

    fn end_line(&mut self, frames: &mut Vec<Frame>) {
        let raw = std::mem::take(&mut self.line);
        let line = String::from_utf8_lossy(&raw);
        if line.is_empty() {
            frames.extend(self.dispatch());
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };
        // event:, id:, retry: carry no text
        if field == "data" {
            self.data_len += value.len() + 1;
            self.data.push(value.to_string());
        }
    }

    fn dispatch(&mut self) -> Option<Frame> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        self.data_len = 0;
        Self::decode_payload(&payload)
    }

    /// Interpret the data of one event. Returns `None` for events that carry
    /// no text.
    ///
    /// JSON objects and strings are unwrapped; anything else, including bare
    /// JSON numbers or literals, is text as sent.
    pub fn decode_payload(data: &str) -> Option<Frame> {
        if data.trim() == "[DONE]" {
            return Some(Frame::Done);
        }

        match serde_json::from_str::<Value>(data) {
            Ok(Value::String(text)) => non_empty(text),
            Ok(Value::Object(obj)) => {
                if let Some(err) = obj.get("error").filter(|e| !e.is_null()) {
                    let message = err
                        .get("message")
                        .and_then(|m| m.as_str())
                        .or_else(|| err.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| err.to_string());
                    return Some(Frame::Error(message));
                }
                let text = ["content", "text", "delta"]
                    .iter()
                    .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
                    .or_else(|| {
                        obj.get("choices")
                            .and_then(|c| c.get(0))
                            .and_then(|c| c.get("delta"))
                            .and_then(|d| d.get("content"))
                            .and_then(|c| c.as_str())
                    });
                match text {
                    Some(text) => non_empty(text.to_string()),
                    None => {
                        debug!(keys = ?obj.keys().collect::<Vec<_>>(), "SSE event without text");
                        None
                    }
                }
            }
            _ => non_empty(data.to_string()),
        }
    }
}

fn non_empty(text: String) -> Option<Frame> {
    if text.is_empty() {
        None
    } else {
        Some(Frame::Text(text))
    }
}

/// Transport-specific framing.
#[derive(Debug)]
pub enum FrameDecoder {
    Sse(SseDecoder),
    Chunked(Utf8Decoder),
}

impl FrameDecoder {
    pub fn new(transport: StreamTransport) -> Self {
        match transport {
            StreamTransport::Sse => FrameDecoder::Sse(SseDecoder::default()),
            StreamTransport::Chunked => FrameDecoder::Chunked(Utf8Decoder::default()),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        match self {
            FrameDecoder::Sse(d) => d.feed(chunk),
            FrameDecoder::Chunked(d) => non_empty(d.feed(chunk)).into_iter().collect(),
        }
    }

    pub fn finish(&mut self) -> Vec<Frame> {
        match self {
            FrameDecoder::Sse(d) => d.finish(),
            FrameDecoder::Chunked(d) => non_empty(d.finish()).into_iter().collect(),
        }
    }
}

struct DecodeState<S> {
    source: S,
    decoder: FrameDecoder,
    ready: VecDeque<Result<String, BackendError>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    /// Queue frames up to the first terminal one.
    fn absorb(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            match frame {
                Frame::Text(text) => self.ready.push_back(Ok(text)),
                Frame::Done => {
                    self.finished = true;
                    return;
                }
                Frame::Error(message) => {
                    warn!(error = %message, "Backend reported an error mid-stream");
                    self.ready
                        .push_back(Err(BackendError::Streaming { message }));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Turn a body byte stream into a [`FragmentStream`].
pub fn decode_stream<S>(source: S, transport: StreamTransport) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, BackendError>> + Send + 'static,
{
    let state = DecodeState {
        source: source.boxed(),
        decoder: FrameDecoder::new(transport),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.ready.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.source.next().await {
                Some(Ok(chunk)) => {
                    let frames = st.decoder.feed(&chunk);
                    st.absorb(frames);
                }
                Some(Err(e)) => {
                    st.ready.push_back(Err(e));
                    st.finished = true;
                }
                None => {
                    let frames = st.decoder.finish();
                    st.absorb(frames);
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// A fragment stream over fixed items, used by the mock backend and tests.
pub fn from_fragments<I>(items: I) -> FragmentStream
where
    I: IntoIterator<Item = Result<String, BackendError>>,
    I::IntoIter: Send + 'static,
{
    stream::iter(items).boxed()
}
