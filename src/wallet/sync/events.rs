//! Progress frame protocol for sync runs.
//!
//! A run reports to its caller through a sequence of `ProgressFrame`s: any number of
//! `Progress` and `Chunk` frames, then exactly one terminal frame (`Complete` or `Error`).
//! `ProgressStreamer` owns the outgoing sink and enforces that ordering. Sending the
//! terminal frame consumes the streamer and drops the sink, which closes the channel.

use crate::wallet::{NormalizedEvent, WalletSyncError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// One unit of the push-stream progress protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressFrame {
    /// A page is about to be fetched, or the cache is about to be served.
    Progress {
        message: String,
        page_index: u32,
        total_pages_estimate: u32,
        percent: u8,
        elapsed_ms: u64,
    },
    /// Normalized events of one page.
    Chunk {
        events: Vec<NormalizedEvent>,
        page_index: u32,
        total_events_so_far: u64,
    },
    /// The run finished successfully.
    Complete {
        total_pages: u32,
        total_events: u64,
        has_more: bool,
        from_cache: bool,
    },
    /// The run was aborted.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
}

impl ProgressFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressFrame::Complete { .. } | ProgressFrame::Error { .. })
    }

    /// Terminal frame describing `err`.
    pub fn from_error(err: &WalletSyncError) -> Self {
        ProgressFrame::Error {
            message: err.to_string(),
            status: err.status(),
        }
    }
}

/// Destination for progress frames.
///
/// Each `send` is awaited before the run continues, so a slow receiver slows the run down.
#[async_trait::async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: ProgressFrame) -> Result<(), WalletSyncError>;
}

#[async_trait::async_trait]
impl FrameSink for mpsc::Sender<ProgressFrame> {
    async fn send(&mut self, frame: ProgressFrame) -> Result<(), WalletSyncError> {
        mpsc::Sender::send(self, frame)
            .await
            .map_err(|_| WalletSyncError::StreamClosed)
    }
}

/// Sink that drops every frame. Used by background runs nobody is listening to.
#[derive(Debug, Default)]
pub struct DiscardSink;

#[async_trait::async_trait]
impl FrameSink for DiscardSink {
    async fn send(&mut self, _frame: ProgressFrame) -> Result<(), WalletSyncError> {
        Ok(())
    }
}

/// Enforces the frame ordering of a single run.
pub struct ProgressStreamer<S: FrameSink> {
    sink: S,
    frames_sent: usize,
}

impl<S: FrameSink> ProgressStreamer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            frames_sent: 0,
        }
    }

    /// Send a non-terminal frame.
    ///
    /// Terminal frames must go through `finish`.
    pub async fn emit(&mut self, frame: ProgressFrame) -> Result<(), WalletSyncError> {
        if frame.is_terminal() {
            return Err(WalletSyncError::Transport(
                "terminal frame sent through emit".to_string(),
            ));
        }
        self.sink.send(frame).await?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Send the terminal frame and close the sink.
    ///
    /// The sink is dropped whether or not the send succeeds.
    pub async fn finish(mut self, terminal: ProgressFrame) -> Result<(), WalletSyncError> {
        debug_assert!(terminal.is_terminal());
        let result = self.sink.send(terminal).await;
        debug!("Progress stream closed after {} frames", self.frames_sent + 1);
        result
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_tagged_camel_case() {
        let frame = ProgressFrame::Progress {
            message: "Fetching page 1".to_string(),
            page_index: 1,
            total_pages_estimate: 10,
            percent: 10,
            elapsed_ms: 12,
        };
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "progress");
        assert_eq!(json["pageIndex"], 1);
        assert_eq!(json["totalPagesEstimate"], 10);
        assert_eq!(json["elapsedMs"], 12);
    }

    #[test]
    fn error_status_is_optional() {
        let with_status = serde_json::to_value(ProgressFrame::Error {
            message: "rate limited".to_string(),
            status: Some(429),
        })
        .unwrap();
        assert_eq!(with_status["status"], 429);

        let without: ProgressFrame =
            serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert_eq!(
            without,
            ProgressFrame::Error {
                message: "boom".to_string(),
                status: None
            }
        );
    }

    #[test]
    fn complete_frame_field_names() {
        let json = serde_json::to_value(ProgressFrame::Complete {
            total_pages: 3,
            total_events: 7,
            has_more: true,
            from_cache: false,
        })
        .unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["hasMore"], true);
        assert_eq!(json["fromCache"], false);
    }

    #[tokio::test]
    async fn finish_closes_the_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut streamer = ProgressStreamer::new(tx);

        streamer
            .emit(ProgressFrame::Chunk {
                events: vec![],
                page_index: 1,
                total_events_so_far: 0,
            })
            .await
            .unwrap();
        streamer
            .finish(ProgressFrame::Complete {
                total_pages: 1,
                total_events: 0,
                has_more: false,
                from_cache: false,
            })
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(ProgressFrame::Chunk { .. })));
        assert!(matches!(rx.recv().await, Some(ProgressFrame::Complete { .. })));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn emit_rejects_terminal_frames() {
        let mut streamer = ProgressStreamer::new(DiscardSink);
        let result = streamer
            .emit(ProgressFrame::Error {
                message: "x".to_string(),
                status: None,
            })
            .await;
        assert!(result.is_err());
        assert_eq!(streamer.frames_sent(), 0);
    }

    #[tokio::test]
    async fn dropped_receiver_reports_stream_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut streamer = ProgressStreamer::new(tx);
        let result = streamer
            .emit(ProgressFrame::Chunk {
                events: vec![],
                page_index: 1,
                total_events_so_far: 0,
            })
            .await;
        assert!(matches!(result, Err(WalletSyncError::StreamClosed)));
    }
}
