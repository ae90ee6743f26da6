//! Probe sender.
//!
//! Walks every target and, for each one that resolves to a hardware address,
//! replays every template rewritten for that target. Per-target and per-frame
//! failures are logged and skipped; the run always reaches the end of the
//! target list and then signals completion.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use pcap_file::DataLink;
use pnet::util::MacAddr;
use tokio::sync::oneshot;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::metrics::{BUILD_ERRORS, FRAMES_SENT, SEND_ERRORS, TARGETS_SKIPPED};
use crate::network::{FrameBuilder, LinkResolver, PacketSender};
use crate::session::{SessionKey, SessionTracker};
use crate::template::PacketTemplate;

/// Pause after each frame when no rate limit is configured.
pub const COURTESY_DELAY: Duration = Duration::from_millis(10);

/// Counters of a finished send run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub targets: usize,
    pub targets_skipped: usize,
    pub frames_sent: u64,
    pub send_errors: u64,
    pub build_errors: u64,
}

/// Replays templates against targets through a [`PacketSender`].
pub struct ProbeSender<S, R> {
    sender: S,
    resolver: R,
    builder: FrameBuilder,
    source_ip: IpAddr,
    source_mac: MacAddr,
    sessions: Option<Arc<SessionTracker>>,
    rate_limit: Option<u32>,
}

impl<S, R> ProbeSender<S, R>
where
    S: PacketSender,
    R: LinkResolver,
{
    pub const fn new(
        sender: S,
        resolver: R,
        builder: FrameBuilder,
        source_ip: IpAddr,
        source_mac: MacAddr,
    ) -> Self {
        Self {
            sender,
            resolver,
            builder,
            source_ip,
            source_mac,
            sessions: None,
            rate_limit: None,
        }
    }

    /// Record the flow of every frame in `sessions` before it is sent.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<SessionTracker>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Send at most `pps` frames per second. None or zero disables the limit.
    #[must_use]
    pub fn with_rate_limit(mut self, pps: Option<u32>) -> Self {
        self.rate_limit = pps.filter(|&pps| pps > 0);
        self
    }

    /// Send every template to every target, in order, then fire `done`.
    pub async fn run(
        mut self,
        targets: &[IpAddr],
        templates: &[PacketTemplate],
        done: oneshot::Sender<()>,
    ) -> SenderStats {
        info!(
            "Sending {} templates from {} to {} targets",
            templates.len(),
            self.source_ip,
            targets.len()
        );

        let mut ticker = self.rate_limit.map(|pps| {
            info!("Rate limited to {pps} packets per second");
            let period = (Duration::from_secs(1) / pps).max(Duration::from_nanos(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        let mut stats = SenderStats {
            targets: targets.len(),
            ..SenderStats::default()
        };
        for &target in targets {
            self.probe_target(target, templates, ticker.as_mut(), &mut stats)
                .await;
        }

        info!(
            "Sender finished: {} frames sent, {} send errors, {} build errors, {} targets skipped",
            stats.frames_sent, stats.send_errors, stats.build_errors, stats.targets_skipped
        );
        // The listener may already be gone.
        let _ = done.send(());
        stats
    }

    #[instrument(skip_all, fields(target = %target))]
    async fn probe_target(
        &mut self,
        target: IpAddr,
        templates: &[PacketTemplate],
        mut ticker: Option<&mut Interval>,
        stats: &mut SenderStats,
    ) {
        let destination_mac = match self.resolver.resolve(target) {
            Ok(mac) => mac,
            Err(e) => {
                warn!("Skipping target {target}: {e}");
                counter!(TARGETS_SKIPPED).increment(1);
                stats.targets_skipped += 1;
                return;
            }
        };

        for template in templates {
            if let Some(ticker) = ticker.as_deref_mut() {
                ticker.tick().await;
            }

            let frame = match self.builder.build(
                template,
                self.source_ip,
                target,
                self.source_mac,
                destination_mac,
            ) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        "Failed to build frame for {target} from template recorded at {:?}: {e}",
                        template.timestamp()
                    );
                    counter!(BUILD_ERRORS).increment(1);
                    stats.build_errors += 1;
                    continue;
                }
            };

            if let Some(sessions) = &self.sessions
                && let Some(key) = SessionKey::from_frame(frame.as_slice(), DataLink::ETHERNET)
            {
                debug!("Recording flow {key}");
                sessions.record(key);
            }

            match self.sender.send(frame.as_slice()) {
                Ok(()) => {
                    counter!(FRAMES_SENT).increment(1);
                    stats.frames_sent += 1;
                }
                Err(e) => {
                    warn!("Failed to send frame to {target}: {e}");
                    counter!(SEND_ERRORS).increment(1);
                    stats.send_errors += 1;
                }
            }

            if ticker.is_none() {
                tokio::time::sleep(COURTESY_DELAY).await;
            }
        }
    }
}
