use clap::{builder::TypedValueParser, Parser};
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use termdeck_backend::DEFAULT_QUEUE_CAPACITY;
use termdeck_core::{
    bridge_ipc::DEFAULT_CHANNEL, MonitorConfig, DEFAULT_MONITORING_INTERVAL_MS,
};
use termdeck_hub::{
    default_socket_path, handlers::HeadlessDialog, system_terminal::SystemTerminalConfig, Host,
    HostConfig, TransportConfig,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    EnvFilter,
};

/// Host process of the termdeck bridge. Every flag falls back to its
/// `TERMDECK_*` environment variable.
#[derive(Parser, Debug)]
#[command(name = "termdeck-host")]
struct Cli {
    #[arg(long, env = "TERMDECK_CHANNEL", default_value = DEFAULT_CHANNEL)]
    channel: String,
    /// Defaults to `<tmp>/termdeck/<channel>.sock`.
    #[arg(long, env = "TERMDECK_SOCKET")]
    socket: Option<PathBuf>,
    /// Also settable with TERMDECK_DEBUG=1.
    #[arg(long)]
    debug: bool,
    #[arg(long, env = "TERMDECK_LOG_DIR")]
    log_dir: Option<PathBuf>,
    #[arg(
        long,
        env = "TERMDECK_MONITOR_INTERVAL_MS",
        default_value_t = DEFAULT_MONITORING_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    monitor_interval_ms: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_QUEUE_CAPACITY,
        value_parser = clap::value_parser!(u64).range(1..).map(|value| value as usize)
    )]
    queue_capacity: usize,
    /// Seconds a window may stall a write before it is disconnected.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    write_timeout: u64,
}

impl Cli {
    fn socket_path(&self) -> PathBuf {
        self.socket
            .clone()
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| default_socket_path(&self.channel))
    }

    fn host_config(&self) -> HostConfig {
        let mut transport = TransportConfig::new(self.socket_path());
        transport.write_timeout = Duration::from_secs(self.write_timeout);
        transport.queue_capacity = self.queue_capacity;
        HostConfig {
            channel: self.channel.clone(),
            monitor: MonitorConfig {
                monitoring_interval_ms: self.monitor_interval_ms,
                ..MonitorConfig::default()
            },
            system_terminal: SystemTerminalConfig::default(),
            backend_queue_capacity: self.queue_capacity,
            transport,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = cli.host_config();
    let host = match Host::new(config.clone(), Arc::new(HeadlessDialog)) {
        Ok(host) => host,
        Err(err) => {
            error!(event = "host_error", error = %err);
            std::process::exit(1);
        }
    };

    info!(
        event = "host_start",
        channel = %config.channel,
        socket = %config.transport.socket_path.display(),
        monitor_interval_ms = config.monitor.monitoring_interval_ms
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "host_signal", signal = "ctrl_c");
        let _ = shutdown_tx.send(true);
    });

    if let Err(err) = host.run(shutdown_rx).await {
        error!(event = "host_error", error = %err);
        std::process::exit(1);
    }
}

/// Logs go to `<log-dir>/termdeck-host-<channel>.log` when a log directory
/// is set, and to stdout when none is set or TERMDECK_LOG_STDOUT is on.
/// `RUST_LOG` overrides the level, then TERMDECK_LOG_LEVEL.
fn init_logging(cli: &Cli) {
    let debug = cli.debug || env_flag("TERMDECK_DEBUG");
    let fallback_level = if debug {
        "debug".to_string()
    } else {
        std::env::var("TERMDECK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_level));

    let file = cli
        .log_dir
        .as_deref()
        .filter(|dir| !dir.as_os_str().is_empty())
        .and_then(|dir| match open_log_file(dir, &cli.channel) {
            Ok(file) => Some(Arc::new(file)),
            Err(err) => {
                eprintln!("termdeck-host: cannot open log file in {}: {err}", dir.display());
                None
            }
        });
    let ansi = file.is_none();
    let writer = match file {
        Some(file) if env_flag("TERMDECK_LOG_STDOUT") => {
            BoxMakeWriter::new(io::stdout.and(file))
        }
        Some(file) => BoxMakeWriter::new(file),
        None => BoxMakeWriter::new(io::stdout),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .try_init();
}

fn open_log_file(dir: &Path, channel: &str) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("termdeck-host-{channel}.log")))
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).is_ok_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_socket_flag_falls_back_to_channel_path() {
        let cli = Cli::try_parse_from(["termdeck-host", "--channel", "dev", "--socket", ""])
            .expect("parse");
        assert_eq!(cli.socket_path(), default_socket_path("dev"));

        let config = cli.host_config();
        assert_eq!(config.channel, "dev");
        assert_eq!(config.transport.queue_capacity, cli.queue_capacity);
    }

    #[test]
    fn zero_sized_limits_are_rejected() {
        for flag in ["--queue-capacity", "--write-timeout", "--monitor-interval-ms"] {
            assert!(
                Cli::try_parse_from(["termdeck-host", flag, "0"]).is_err(),
                "{flag} accepted 0"
            );
        }
    }
}
