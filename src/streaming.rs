//! `StreamingBridge` (§4.7).
//!
//! Grounded on `client_wrapper.rs`'s streaming type aliases and
//! `clients/common.rs::chunks_to_stream` (adapting a vendor's raw chunk
//! stream into this codebase's delta type); generalized into a
//! producer/consumer bridge that decouples a provider's stream from the
//! HTTP responder so a disconnected consumer never stops full-text
//! accumulation (§4.7 guarantees).

use crate::provider::{TextDelta, TextDeltaStream};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One frame published to the bridge's consumer queue.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Delta(TextDelta),
    /// A provider error occurred mid-stream; the bridge still finishes
    /// with whatever partial text it accumulated (§4.7).
    Error(String),
    Done,
}

/// The outcome of running a stream to completion (or early termination).
#[derive(Debug, Clone)]
pub struct StreamedText {
    pub full_text: String,
    /// Set when the stream ended via provider error or cancellation rather
    /// than a clean end-of-stream (§4.7: "conversation entry still records
    /// partial text (tagged `partial`)").
    pub partial: bool,
}

/// Bridges a provider's [`TextDeltaStream`] to an unbounded consumer queue
/// on a dedicated worker task (§4.7).
pub struct StreamingBridge;

impl StreamingBridge {
    /// Spawns the worker task and returns a handle yielding the final
    /// [`StreamedText`] once the stream ends, errors, or is cancelled.
    /// The queue send is best-effort: a disconnected consumer (`send`
    /// returning `Err`) never stops accumulation, satisfying "the final
    /// full-text value is always computed even if the consumer
    /// disconnects".
    pub fn spawn(
        mut source: TextDeltaStream,
        sink: mpsc::UnboundedSender<StreamFrame>,
        cancel: CancellationToken,
    ) -> JoinHandle<StreamedText> {
        tokio::spawn(async move {
            let mut full_text = String::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        // The bridge has no direct "stop" signal into the provider's
                        // stream; draining discards remaining deltas without
                        // forwarding them, per §4.7's fallback when it "cannot"
                        // signal the provider to stop.
                        while source.next().await.is_some() {}
                        return StreamedText { full_text, partial: true };
                    }
                    next = source.next() => {
                        match next {
                            Some(Ok(delta)) => {
                                full_text.push_str(&delta.content);
                                let _ = sink.send(StreamFrame::Delta(delta));
                            }
                            Some(Err(err)) => {
                                let _ = sink.send(StreamFrame::Error(err.to_string()));
                                return StreamedText { full_text, partial: true };
                            }
                            None => {
                                let _ = sink.send(StreamFrame::Done);
                                return StreamedText { full_text, partial: false };
                            }
                        }
                    }
                }
            }
        })
    }

    /// Publishes `text` as a single delta frame followed by `Done`, used
    /// when a caller requested streaming but the runtime already has the
    /// complete text in hand (the tool-loop case in §4.6/§9: intermediate
    /// iterations are buffered, so only the final turn can stream and it
    /// streams as one frame rather than a fabricated re-chunking).
    pub fn emit_single(sink: &mpsc::UnboundedSender<StreamFrame>, text: String) {
        let _ = sink.send(StreamFrame::Delta(TextDelta { content: text, finish_reason: Some("stop".to_string()) }));
        let _ = sink.send(StreamFrame::Done);
    }
}
