use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Read};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use seriallog_kernel::config::{LogConfig, OpenMode, SerialConfig};
use seriallog_kernel::log::{AppendMode, InMemoryLogService};
use seriallog_kernel::serial::{ReaderSource, SerialLineReader};
use seriallog_kernel::{Bridge, BridgeConfig, BridgeReport};

/// Seriallog CLI
#[derive(Parser, Debug)]
#[command(name = "seriallog")]
#[command(about = "Append lines from a serial device to a remote log", long_about = None)]
struct Cli {
    /// Path to bridge config JSON. Flags override its fields.
    #[arg(long)]
    config: Option<String>,

    /// Serial device path, e.g. /dev/ttyACM0
    #[arg(long)]
    device: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Base URL of the log service
    #[arg(long)]
    server: Option<String>,

    /// Name of the destination log
    #[arg(long)]
    log_name: Option<String>,

    /// Create the log if it does not exist
    #[arg(long)]
    create: bool,

    /// Log server that hosts a newly created log (defaults to this host)
    #[arg(long)]
    log_server: Option<String>,

    /// Append mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Slots in the queue between the serial and log legs
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Frame lines from --input into an in-memory log
    #[arg(long, requires = "input")]
    dry_run: bool,

    /// Input file for --dry-run, `-` for stdin
    #[arg(long)]
    input: Option<String>,

    /// Diagnostic output format (written to stderr)
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Strict,
    Blind,
}

impl From<ModeArg> for AppendMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Strict => AppendMode::StrictAppend,
            ModeArg::Blind => AppendMode::BlindAppend,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Wrapper for JSON output
#[derive(Debug, Serialize)]
struct CliOutput {
    report: BridgeReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    entries: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct PortOutput {
    port: String,
    kind: &'static str,
}

/// How long blocking tasks get to finish once the bridge is done. A
/// read on stdin only returns with new input, so it is not awaited.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if cli.list_ports {
        list_ports()?;
        return Ok(ExitCode::SUCCESS);
    }

    block_on_with_grace(run(cli), RUNTIME_SHUTDOWN_GRACE)?
}

/// Drive `future` on a fresh runtime, then give leftover blocking
/// tasks at most `grace` before returning.
fn block_on_with_grace<F: Future>(future: F, grace: Duration) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("could not start async runtime")?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    // ----------------------------
    // Load configuration
    // ----------------------------
    let config = load_config(&cli)?;

    // ----------------------------
    // Run bridge
    // ----------------------------
    let bridge = Bridge::new(config.clone())?;
    let shutdown = bridge.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let output = match cli.input.as_deref().filter(|_| cli.dry_run) {
        Some(input) => dry_run(bridge, &config, input).await?,
        None => CliOutput {
            report: bridge.run().await?,
            entries: None,
        },
    };

    // ----------------------------
    // Output
    // ----------------------------
    println!("{}", serde_json::to_string_pretty(&output)?);

    if output.report.is_disconnected() {
        warn!("device disconnected; restart once it is back");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn list_ports() -> Result<()> {
    let ports: Vec<PortOutput> = serialport::available_ports()
        .context("could not enumerate serial ports")?
        .into_iter()
        .map(|info| PortOutput {
            port: info.port_name,
            kind: match info.port_type {
                serialport::SerialPortType::UsbPort(_) => "usb",
                serialport::SerialPortType::PciPort => "pci",
                serialport::SerialPortType::BluetoothPort => "bluetooth",
                _ => "unknown",
            },
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&ports)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let data =
                fs::read_to_string(path).with_context(|| format!("could not read {path}"))?;
            BridgeConfig::from_json(&data)?
        }
        None => BridgeConfig::new(SerialConfig::new(""), LogConfig::new("", "")),
    };

    if let Some(device) = &cli.device {
        config.serial.device = device.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(server) = &cli.server {
        config.log.server = server.clone();
    }
    if let Some(name) = &cli.log_name {
        config.log.name = name.clone();
    }
    if let Some(mode) = cli.mode {
        config.log.mode = mode.into();
    }
    if cli.create {
        config.log.open_mode = OpenMode::CreateIfMissing;
    }
    if let Some(log_server) = &cli.log_server {
        config.log.log_server = Some(log_server.clone());
    }
    if let Some(capacity) = cli.queue_capacity {
        config.queue_capacity = capacity;
    }

    if config.log.open_mode == OpenMode::CreateIfMissing && config.log.log_server.is_none() {
        config.log.log_server = Some(local_hostname());
    }

    // A dry run needs neither a device nor a server.
    if cli.dry_run {
        if config.serial.device.is_empty() {
            config.serial.device = cli.input.clone().unwrap_or_else(|| "-".into());
        }
        if config.log.server.is_empty() {
            config.log.server = "memory".into();
        }
    }

    Ok(config)
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".into())
}

async fn dry_run(bridge: Bridge, config: &BridgeConfig, input: &str) -> Result<CliOutput> {
    let source: Box<dyn Read + Send> = if input == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(input).with_context(|| format!("could not open {input}"))?)
    };

    let service = InMemoryLogService::new().with_log(&config.log.name);
    let report = bridge
        .run_with(
            move |serial: &SerialConfig| {
                Ok(SerialLineReader::from_source(
                    ReaderSource::new(source),
                    serial.buffer_limit,
                ))
            },
            service.clone(),
        )
        .await?;

    let entries = service
        .entries(&config.log.name)
        .unwrap_or_default()
        .iter()
        .map(|entry| String::from_utf8_lossy(entry).into_owned())
        .collect();

    Ok(CliOutput {
        report,
        entries: Some(entries),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn stuck_blocking_task_does_not_hold_the_runtime() {
        let started = Instant::now();
        let output = block_on_with_grace(
            async {
                tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(30)));
                7
            },
            Duration::from_millis(50),
        )
        .unwrap();

        assert_eq!(output, 7);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn dry_run_defaults_device_and_server() {
        let cli = Cli::parse_from([
            "seriallog",
            "--dry-run",
            "--input",
            "-",
            "--log-name",
            "sensors",
        ]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.serial.device, "-");
        assert_eq!(config.log.server, "memory");
        assert!(config.validate().is_ok());
    }
}
