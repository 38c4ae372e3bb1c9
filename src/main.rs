//! USB Probe Monitor
//!
//! Watches USB hotplug events and probes newly attached mass-storage
//! devices. Also lists attached USB devices and probes a single device
//! node on demand.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use usb_probe_monitor::domain::ports::{
    DeviceTreeRef, StorageClassifierRef, StorageProber, StorageProberRef,
};
use usb_probe_monitor::report::build_sink;
use usb_probe_monitor::shutdown::spawn_signal_listener;
use usb_probe_monitor::{
    BlockDeviceProber, CorrelationEngine, DisplayBackend, MassStorageClassifier, MonitorConfig,
    NetlinkGroup, NetlinkMonitor, ProbeMode, ScannerConfig, SysfsDeviceTree, UsbScanner,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// USB Probe Monitor - detect and test USB storage devices as they are attached
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "USB_PROBE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch hotplug events and probe attached storage (default)
    Monitor(MonitorArgs),

    /// List attached USB devices
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Probe a block device node once
    Probe {
        /// Device node, e.g. /dev/sdb
        node: String,

        /// Write and verify a test pattern (destroys data on the device)
        #[arg(long)]
        read_write: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug, Default)]
struct MonitorArgs {
    /// Path to sysfs
    #[arg(long)]
    sysfs_path: Option<PathBuf>,

    /// Netlink group to listen on
    #[arg(long, value_enum)]
    netlink_group: Option<NetlinkGroup>,

    /// Bounded wait per poll in milliseconds
    #[arg(long)]
    poll_timeout_ms: Option<u64>,

    /// Write and verify a test pattern on detected storage (destroys data)
    #[arg(long)]
    read_write: bool,

    /// Report viewer
    #[arg(long, value_enum)]
    display: Option<DisplayBackend>,

    /// Directory for temporary report files
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

impl MonitorArgs {
    /// Apply command line overrides on top of the file configuration
    fn apply(self, config: &mut MonitorConfig) {
        if let Some(path) = self.sysfs_path {
            config.sysfs_path = path;
        }
        if let Some(group) = self.netlink_group {
            config.netlink_group = group;
        }
        if let Some(timeout) = self.poll_timeout_ms {
            config.poll_timeout_ms = timeout;
        }
        if self.read_write {
            config.probe_mode = ProbeMode::ReadWrite;
        }
        if let Some(display) = self.display {
            config.display = display;
        }
        if let Some(dir) = self.report_dir {
            config.report_dir = dir;
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = load_config(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Monitor(MonitorArgs::default())) {
        Command::Monitor(monitor_args) => run_monitor(config, monitor_args).await,
        Command::List { json } => run_list(&config, json),
        Command::Probe {
            node,
            read_write,
            json,
        } => run_probe(&config, node, read_write, json).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MonitorConfig> {
    match path {
        Some(path) => {
            let config = MonitorConfig::from_file(path)
                .with_context(|| format!("cannot load configuration from {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(MonitorConfig::default()),
    }
}

// =============================================================================
// Monitor
// =============================================================================

async fn run_monitor(mut config: MonitorConfig, args: MonitorArgs) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!("Starting USB Probe Monitor");
    info!("  Version: {}", usb_probe_monitor::VERSION);
    info!("  Sysfs: {}", config.sysfs_path.display());
    info!("  Netlink group: {}", config.netlink_group);
    info!("  Probe mode: {}", config.probe_mode);
    info!("  Display: {:?}", config.display);

    if config.probe_mode == ProbeMode::ReadWrite {
        warn!("Read-write probing overwrites the first {} bytes of every detected device", config.probe.read_write_bytes);
    }

    let tree: DeviceTreeRef = Arc::new(SysfsDeviceTree::new(config.sysfs_path.clone()));
    let classifier: StorageClassifierRef = Arc::new(MassStorageClassifier::new(tree.clone()));
    let prober: StorageProberRef = Arc::new(BlockDeviceProber::new(config.probe.clone()));
    let sink = build_sink(config.display, &config.report_dir);

    let mut monitor = NetlinkMonitor::open(&config, tree.clone())
        .context("cannot start hotplug event source")?;
    let mut engine = CorrelationEngine::new(tree, classifier, prober, sink, config.probe_mode);

    // Registry observer, ends when the engine is dropped
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!("Registry event for {}: {:?}", event.path(), event);
        }
    });

    let token = CancellationToken::new();
    spawn_signal_listener(token.clone());

    let loop_token = token.clone();
    let (result, stats) = tokio::task::spawn_blocking(move || {
        let result = monitor.run(&loop_token, |event| engine.handle_event(event));
        (result, engine.stats())
    })
    .await
    .context("monitor thread panicked")?;

    token.cancel();
    info!(
        "Monitor stopped: {} attached, {} detached, {} probes, {} reports, {} dropped events",
        stats.attached, stats.detached, stats.probes_run, stats.reports_dispatched, stats.events_dropped
    );

    result.context("hotplug event source failed")?;
    Ok(())
}

// =============================================================================
// List
// =============================================================================

fn run_list(config: &MonitorConfig, json: bool) -> anyhow::Result<()> {
    let scanner = UsbScanner::new(ScannerConfig {
        sysfs_path: config.sysfs_path.clone(),
        ..Default::default()
    });
    let devices = scanner.scan().context("cannot enumerate USB devices")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        for device in &devices {
            println!("{}", device);
        }
    }
    Ok(())
}

// =============================================================================
// Probe
// =============================================================================

async fn run_probe(
    config: &MonitorConfig,
    node: String,
    read_write: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mode = if read_write {
        ProbeMode::ReadWrite
    } else {
        ProbeMode::ReadOnly
    };
    let prober = BlockDeviceProber::new(config.probe.clone());

    let probe_node = node.clone();
    let report = tokio::task::spawn_blocking(move || prober.probe(&probe_node, mode))
        .await
        .context("probe thread panicked")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }

    if !report.is_healthy() {
        bail!("probe of {} found problems", node);
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so list/probe output stays parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
