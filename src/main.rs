//! pcap-scanner - Entry point.
//!
//! This binary replays the packets of a template archive against every
//! configured target and, when capture is enabled, stores the responses in a
//! timestamped pcap archive.

use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use chrono::Local;
use pnet::datalink::NetworkInterface;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pcap_scanner::config::Config;
use pcap_scanner::listener::{Listener, ListenerStats, spawn_capture_task};
use pcap_scanner::network::{
    BufferPool, FrameBuilder, PacketCapture, PcapCapture, PcapFileSink, PnetSender, ProcTables,
    TableResolver, find_interface, interface_addresses, response_filter,
};
use pcap_scanner::sender::ProbeSender;
use pcap_scanner::session::SessionTracker;
use pcap_scanner::{target, template};

/// Handles of the response capture side.
struct CaptureTasks {
    capture: JoinHandle<()>,
    listener: JoinHandle<ListenerStats>,
}

/// Open the capture and the response archive, then start the listener.
fn start_listener(
    config: &Config,
    interface: &NetworkInterface,
    source_ip: IpAddr,
    sessions: &Arc<SessionTracker>,
    running: &Arc<AtomicBool>,
    done: oneshot::Receiver<()>,
) -> Result<CaptureTasks> {
    let filter = response_filter(source_ip);
    let capture =
        PcapCapture::open(&interface.name, &filter).context("Failed to open response capture")?;
    info!("Capturing on {} with filter {filter:?}", interface.name);

    let link_type = capture.link_type();
    let sink = PcapFileSink::create(&config.capture.output_dir, Local::now(), link_type)
        .context("Failed to create response archive")?;
    info!("Saving responses to {}", sink.path().display());

    let (frame_tx, frame_rx) = mpsc::channel(config.capture.channel_capacity);
    let listener = Listener::new(Arc::clone(sessions), sink, link_type);

    Ok(CaptureTasks {
        capture: spawn_capture_task(capture, frame_tx, Arc::clone(running)),
        listener: tokio::spawn(listener.run(frame_rx, done)),
    })
}

async fn run() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(Cow::Owned)
        .unwrap_or(Cow::Borrowed("config.toml"));
    let config = Config::load(config_path.as_ref()).context("Failed to load configuration")?;

    // Initialize metrics (must be done early, before any metrics are recorded)
    pcap_scanner::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    info!("Starting pcap-scanner...");

    let interface =
        find_interface(config.interface.as_deref()).context("Failed to find network interface")?;
    let (source_ip, source_mac) = interface_addresses(&interface, config.source_ip)
        .context("Failed to get interface addresses")?;
    info!(
        "Using interface {} (IP: {source_ip}, MAC: {source_mac})",
        interface.name
    );

    let targets = target::expand_all(&config.targets).context("Invalid target specification")?;
    if targets.is_empty() {
        bail!("Target specification {:?} contains no addresses", config.targets);
    }
    info!("Expanded {} targets", targets.len());

    let templates = template::load(&config.template_pcap).with_context(|| {
        format!(
            "Failed to read template archive {}",
            config.template_pcap.display()
        )
    })?;
    if templates.is_empty() {
        bail!(
            "Template archive {} contains no IPv4 or IPv6 packets",
            config.template_pcap.display()
        );
    }

    let injector = PnetSender::open(&interface).context("Failed to open injection channel")?;
    let mut resolver = TableResolver::new(ProcTables, Some(interface.name.clone()));
    if let Some(ttl) = config.resolver.cache_ttl() {
        info!("Caching resolutions for {ttl:?}");
        resolver = resolver.with_cache_ttl(ttl);
    }
    let mut probe = ProbeSender::new(
        injector,
        resolver,
        FrameBuilder::new(BufferPool::default()),
        source_ip,
        source_mac,
    )
    .with_rate_limit(config.rate_limit());

    let running = Arc::new(AtomicBool::new(true));
    let (done_tx, done_rx) = oneshot::channel();

    let capture_tasks = if config.capture.enabled {
        let sessions = Arc::new(SessionTracker::new());
        let tasks = start_listener(
            &config,
            &interface,
            source_ip,
            &sessions,
            &running,
            done_rx,
        )?;
        probe = probe.with_sessions(sessions);
        Some(tasks)
    } else {
        info!("Response capture disabled");
        None
    };

    let mut sender_handle =
        tokio::spawn(async move { probe.run(&targets, &templates, done_tx).await });

    let sender_stats = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl-C received, stopping sender...");
            sender_handle.abort();
            None
        }
        result = &mut sender_handle => Some(result.context("Sender task failed")?),
    };

    if let Some(tasks) = capture_tasks {
        let listener_stats = tasks.listener.await.context("Listener task failed")?;
        running.store(false, Ordering::SeqCst);
        let _ = tasks.capture.await;
        info!(
            "Responses: {} matched out of {} frames captured",
            listener_stats.responses_matched, listener_stats.frames_seen
        );
    }

    if let Some(stats) = sender_stats {
        info!(
            "Scan complete: {} frames sent to {} targets ({} skipped)",
            stats.frames_sent, stats.targets, stats.targets_skipped
        );
    } else {
        info!("Scan interrupted");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    run().await
}
