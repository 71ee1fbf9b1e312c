//! Thin CLI binary demonstrating how to wire `sipwatch` together: parses
//! arguments, loads an optional TOML config file, adds the requested
//! capture inputs, and prints call-list changes to stdout until
//! interrupted. Not a design target in itself (spec.md §1) — the
//! terminal UI, key bindings and packet-save helpers this CLI would need
//! for parity with the original are explicitly out of scope.

mod config;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sipwatch::{CaptureOutput, InputSpec, Observer, Sipwatch};
use sipwatch_capture::{CaptureSettings, HepOutput, PcapFileOutput};
use sipwatch_storage::Call;

use config::FileConfig;

#[derive(Parser)]
#[command(name = "sipwatch")]
#[command(about = "Live and offline SIP traffic observer", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (`[capture]` / `[storage]` sections).
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Capture live from this network device.
    #[arg(short = 'i', long)]
    iface: Option<String>,

    /// Read packets from this trace file instead of a live device.
    #[arg(short = 'r', long)]
    read: Option<String>,

    /// Listen for HEP v3 traffic on this address, overriding the config file.
    #[arg(long)]
    hep: Option<String>,

    /// BPF filter expression applied to live/offline inputs.
    #[arg(short = 'f', long)]
    bpf: Option<String>,

    /// NSS-format TLS session-keys file for decrypting TLS-carried SIP.
    #[arg(long)]
    keyfile: Option<String>,

    /// Write every decoded packet back out to this pcap file.
    #[arg(long)]
    write: Option<String>,

    /// Re-encapsulate every decoded packet as HEP and forward it here.
    #[arg(long)]
    hep_forward: Option<String>,

    /// Start paused (see `capture.pause_mode` in the config file).
    #[arg(long)]
    paused: bool,
}

struct StdoutObserver;

impl Observer for StdoutObserver {
    fn on_call_added(&self, call: &Call) {
        tracing::info!(call_id = %call.call_id, state = ?call.state, "new call");
    }

    fn on_call_changed(&self, call: &Call) {
        tracing::debug!(call_id = %call.call_id, state = ?call.state, messages = call.messages.len(), "call updated");
    }

    fn on_calls_cleared(&self) {
        tracing::info!("storage cleared");
    }

    fn on_input_failed(&self, failure: &sipwatch::InputFailure) {
        tracing::warn!(input = failure.input.value(), reason = %failure.message, "capture input failed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let capture_settings = merge_capture_settings(file_config.capture, &cli);
    let storage_settings = file_config.storage;
    let hep_addr = capture_settings.hep_listen_addr.clone();
    let hep_secret = capture_settings.hep_secret.clone();

    let sipwatch = Sipwatch::new(capture_settings, &storage_settings);
    let _subscription = sipwatch.subscribe(Arc::new(StdoutObserver));

    add_requested_inputs(&sipwatch, &cli, hep_addr, hep_secret)?;
    add_requested_outputs(&sipwatch, &cli)?;

    sipwatch.start();
    if cli.paused {
        sipwatch.pause(true);
    }

    tracing::info!(status = %sipwatch.status_desc(), "sipwatch running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    sipwatch.stop().await;
    let stats = sipwatch.get_stats();
    tracing::info!(total = stats.total, displayed = stats.displayed, mem_bytes = stats.mem_bytes, "final stats");
    Ok(())
}

fn merge_capture_settings(mut settings: CaptureSettings, cli: &Cli) -> CaptureSettings {
    if let Some(hep_addr) = &cli.hep {
        settings.hep_listen_addr = hep_addr.clone();
    }
    settings
}

fn add_requested_inputs(sipwatch: &Sipwatch, cli: &Cli, hep_addr: String, hep_secret: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &cli.read {
        sipwatch.add_input(InputSpec::TraceFile { path: path.clone(), bpf_filter: cli.bpf.clone() });
    }
    if let Some(name) = &cli.iface {
        sipwatch.add_input(InputSpec::LiveDevice { name: name.clone(), bpf_filter: cli.bpf.clone() });
    }
    // The HEP listener runs unconditionally, same as the original's
    // remote-collector input: it costs nothing idle and callers select
    // it implicitly by pointing a collector at this address.
    sipwatch.add_input(InputSpec::HepListener { addr: hep_addr, secret: hep_secret });

    if let Some(keyfile) = &cli.keyfile {
        sipwatch.set_keyfile(Some(keyfile.clone()));
    }
    if let Some(bpf) = &cli.bpf {
        sipwatch.set_bpf_filter(bpf)?;
    }
    Ok(())
}

fn add_requested_outputs(sipwatch: &Sipwatch, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &cli.write {
        let output = PcapFileOutput::create(path)?;
        sipwatch.add_output(Arc::new(output) as Arc<dyn CaptureOutput>);
    }
    if let Some(addr) = &cli.hep_forward {
        let dest = addr.parse()?;
        let output = HepOutput::connect(dest, None)?;
        sipwatch.add_output(Arc::new(output) as Arc<dyn CaptureOutput>);
    }
    Ok(())
}
