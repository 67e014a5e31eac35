//! Newline-delimited JSON decoding of generation responses.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use pin_project_lite::pin_project;
use tracing::{debug, trace, warn};

use super::cancel::CancelSignal;
use crate::telemetry;
use crate::types::TokenEvent;
use crate::Result;

pin_project! {
    /// Lazy sequence of [`TokenEvent`]s read from a byte transport.
    ///
    /// Created by [`decode`]. Single-use: once it has returned `None` it stays
    /// exhausted, and a new request needs a new transport.
    ///
    /// The stream ends when the transport closes, right after an event with
    /// `done = true`, or as soon as the cancel signal fires. A transport error
    /// is yielded once and also ends the stream. Lines that do not parse are
    /// logged and skipped.
    #[must_use = "streams do nothing unless polled"]
    pub struct TokenStream<S> {
        #[pin]
        transport: S,
        cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
        buffer: Vec<u8>,
        transport_closed: bool,
        finished: bool,
        skipped_lines: usize,
    }
}

/// Decode a chunked NDJSON transport into token events.
///
/// Chunks may split lines anywhere; partial lines are carried over to the
/// next chunk. A final line without a trailing newline is still decoded when
/// the transport closes.
pub fn decode<S>(transport: S, cancel: &CancelSignal) -> TokenStream<S>
where
    S: Stream<Item = Result<Vec<u8>>>,
{
    let cancel = cancel.clone();
    TokenStream {
        transport,
        cancelled: Box::pin(async move { cancel.cancelled().await }),
        buffer: Vec::new(),
        transport_closed: false,
        finished: false,
        skipped_lines: 0,
    }
}

impl<S> TokenStream<S> {
    /// Number of malformed lines skipped so far.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }
}

impl<S> Stream for TokenStream<S>
where
    S: Stream<Item = Result<Vec<u8>>>,
{
    type Item = Result<TokenEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if *this.finished {
                return Poll::Ready(None);
            }

            if this.cancelled.as_mut().poll(cx).is_ready() {
                debug!(
                    buffered_bytes = this.buffer.len(),
                    "token stream cancelled"
                );
                this.buffer.clear();
                *this.finished = true;
                return Poll::Ready(None);
            }

            if let Some(line) = take_line(this.buffer) {
                match parse_line(&line, this.skipped_lines) {
                    Some(event) => {
                        *this.finished = event.done;
                        return Poll::Ready(Some(Ok(event)));
                    }
                    None => continue,
                }
            }

            if *this.transport_closed {
                *this.finished = true;
                let rest = std::mem::take(this.buffer);
                return Poll::Ready(parse_line(&rest, this.skipped_lines).map(Ok));
            }

            match ready!(this.transport.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    trace!(bytes = chunk.len(), "received chunk");
                    this.buffer.extend_from_slice(&chunk);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "transport failed mid-stream");
                    this.buffer.clear();
                    *this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => *this.transport_closed = true,
            }
        }
    }
}

/// Split the first complete line off `buffer`, without its terminator.
fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=pos).collect();
    line.pop();
    Some(line)
}

/// Parse one line. Blank lines are keep-alives; anything else that fails to
/// parse is counted and skipped.
fn parse_line(line: &[u8], skipped: &mut usize) -> Option<TokenEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    match serde_json::from_str::<TokenEvent>(text) {
        Ok(event) => {
            trace!(line = text, "received line");
            Some(event)
        }
        Err(e) => {
            *skipped += 1;
            metrics::counter!(telemetry::DECODE_SKIPPED_LINES_TOTAL).increment(1);
            warn!(line = text, error = %e, "skipping malformed stream line");
            None
        }
    }
}
