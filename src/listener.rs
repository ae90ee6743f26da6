//! Response listener.
//!
//! Receives captured frames, keeps those whose mirrored flow was recorded by
//! the sender and appends them to the response archive. Once the sender
//! reports completion the listener keeps matching for [`DRAIN_GRACE_PERIOD`]
//! so late replies are not lost, then terminates.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use pcap_file::DataLink;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::metrics::{FRAMES_CAPTURED, RESPONSES_MATCHED};
use crate::network::{CapturedFrame, FrameSink, PacketCapture};
use crate::session::{SessionKey, SessionTracker};

/// How long the listener keeps matching after the sender is done.
pub const DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Capturing,
    Draining,
    Terminated,
}

/// Counters of a finished listener run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub frames_seen: u64,
    pub responses_matched: u64,
    pub write_errors: u64,
}

/// Matches inbound frames against recorded flows.
pub struct Listener<W> {
    sessions: Arc<SessionTracker>,
    sink: W,
    link_type: DataLink,
    state: ListenerState,
    stats: ListenerStats,
}

impl<W: FrameSink> Listener<W> {
    /// Create a listener for frames of `link_type`, writing matches to `sink`.
    pub const fn new(sessions: Arc<SessionTracker>, sink: W, link_type: DataLink) -> Self {
        Self {
            sessions,
            sink,
            link_type,
            state: ListenerState::Idle,
            stats: ListenerStats {
                frames_seen: 0,
                responses_matched: 0,
                write_errors: 0,
            },
        }
    }

    pub const fn state(&self) -> ListenerState {
        self.state
    }

    pub const fn stats(&self) -> ListenerStats {
        self.stats
    }

    /// Inspect one frame, archiving it when it answers a recorded flow.
    ///
    /// Returns whether the frame matched.
    pub fn handle_frame(&mut self, frame: &CapturedFrame) -> bool {
        self.stats.frames_seen += 1;
        counter!(FRAMES_CAPTURED).increment(1);

        let Some(key) = SessionKey::from_frame(&frame.data, self.link_type) else {
            return false;
        };
        if !self.sessions.contains(&key.mirrored()) {
            return false;
        }

        info!("Matched response from {} ({key})", key.source);
        self.stats.responses_matched += 1;
        counter!(RESPONSES_MATCHED).increment(1);

        if let Err(e) = self.sink.write(frame) {
            warn!("Failed to archive response from {}: {e}", key.source);
            self.stats.write_errors += 1;
        }
        true
    }

    /// Match frames until the drain window after `done` has elapsed.
    ///
    /// `done` firing or being dropped both mean the sender is finished. The
    /// run also ends early when the capture side closes `frames`.
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<CapturedFrame>,
        mut done: oneshot::Receiver<()>,
    ) -> ListenerStats {
        self.state = ListenerState::Capturing;
        info!("Listening for responses");

        let drain = tokio::time::sleep(DRAIN_GRACE_PERIOD);
        tokio::pin!(drain);

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        warn!("Capture closed before the drain window ended");
                        break;
                    };
                    self.handle_frame(&frame);
                }
                _ = &mut done, if self.state == ListenerState::Capturing => {
                    info!("Sender finished, waiting {DRAIN_GRACE_PERIOD:?} for final responses");
                    self.state = ListenerState::Draining;
                    drain.as_mut().reset(Instant::now() + DRAIN_GRACE_PERIOD);
                }
                () = &mut drain, if self.state == ListenerState::Draining => {
                    debug!("Drain window elapsed");
                    break;
                }
            }
        }

        self.state = ListenerState::Terminated;
        info!(
            "Listener stopped: {} frames seen, {} responses matched",
            self.stats.frames_seen, self.stats.responses_matched
        );
        self.stats
    }
}

/// Spawn the blocking capture loop feeding `frames`.
///
/// The loop ends when `running` is cleared, when the receiving side is gone,
/// or when the capture fails.
pub fn spawn_capture_task<C>(
    mut capture: C,
    frames: mpsc::Sender<CapturedFrame>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    C: PacketCapture + 'static,
{
    tokio::task::spawn_blocking(move || {
        while running.load(Ordering::SeqCst) {
            match capture.next_frame() {
                Ok(Some(frame)) => {
                    if frames.blocking_send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Capture failed: {e}");
                    break;
                }
            }
        }
        debug!("Capture task stopped");
    })
}
