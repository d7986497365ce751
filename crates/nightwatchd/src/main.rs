//! Nightwatch daemon entry point.
//!
//! Exit codes: 0 clean exit, 2 invalid configuration, 3 hardware init
//! failure, 4 unexpected fatal error.

mod orchestrator;
mod server;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nightwatch_config::NightwatchConfig;
use nightwatch_core::Severity;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "nightwatchd", about = "Non-contact vital-signs and anomaly monitor", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the monitor.
    Run {
        /// Configuration file path.
        #[arg(short, long, env = "NIGHTWATCH_CONFIG")]
        config: Option<PathBuf>,
        /// Substitute deterministic synthetic sensors (`NIGHTWATCH_MOCK`
        /// in the environment does the same).
        #[arg(long)]
        mock_sensors: bool,
        /// Reserved for the external setup wizard; accepted and ignored here.
        #[arg(long, hide = true)]
        force_setup: bool,
    },
    /// Run a detector's calibration routine and persist the baseline.
    Calibrate {
        /// Detector name: radar | audio | capacitive.
        detector: String,
        /// Configuration file path.
        #[arg(short, long, env = "NIGHTWATCH_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Ask a running daemon to fire a synthetic alert.
    TestAlert {
        /// Severity: info | warning | critical.
        severity: String,
        /// Configuration file path (to find the control endpoint).
        #[arg(short, long, env = "NIGHTWATCH_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// Well-known config locations tried in order when `--config` is absent.
fn default_config_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("nightwatch.yaml"),
        PathBuf::from("/etc/nightwatch/config.yaml"),
    ]
}

fn load_config(explicit: Option<PathBuf>) -> Result<NightwatchConfig, ExitCode> {
    let path = explicit.or_else(|| default_config_paths().into_iter().find(|p| p.exists()));

    let result = match path {
        Some(path) => nightwatch_config::load_file(&path),
        None => {
            eprintln!("no configuration file found, using defaults");
            return Ok(NightwatchConfig::default());
        }
    };

    result.map_err(|e| {
        eprintln!("configuration error: {e}");
        ExitCode::from(2)
    })
}

fn init_logging(config: &NightwatchConfig) {
    let filter = std::env::var("NIGHTWATCH_LOG_LEVEL")
        .ok()
        .unwrap_or_else(|| config.system.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            mock_sensors,
            force_setup: _,
        } => {
            let mut config = match load_config(config) {
                Ok(config) => config,
                Err(code) => return code,
            };
            config.mock_sensors |= mock_sensors;
            init_logging(&config);

            match orchestrator::run(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(orchestrator::RunError::Hardware(reason)) => {
                    error!(%reason, "hardware initialization failed");
                    ExitCode::from(3)
                }
                Err(orchestrator::RunError::Fatal(reason)) => {
                    error!(%reason, "unexpected fatal error");
                    ExitCode::from(4)
                }
            }
        }

        Commands::Calibrate { detector, config } => {
            let config = match load_config(config) {
                Ok(config) => config,
                Err(code) => return code,
            };
            init_logging(&config);

            match orchestrator::calibrate(&config, &detector).await {
                Ok(summary) => {
                    println!("{summary}");
                    ExitCode::SUCCESS
                }
                Err(orchestrator::RunError::Hardware(reason)) => {
                    error!(%reason, "calibration failed");
                    ExitCode::from(3)
                }
                Err(orchestrator::RunError::Fatal(reason)) => {
                    error!(%reason, "calibration failed");
                    ExitCode::from(4)
                }
            }
        }

        Commands::TestAlert { severity, config } => {
            let config = match load_config(config) {
                Ok(config) => config,
                Err(code) => return code,
            };
            let Some(severity) = Severity::parse(&severity) else {
                eprintln!("unknown severity '{severity}' (info | warning | critical)");
                return ExitCode::from(2);
            };

            let url = format!(
                "http://{}:{}/control",
                config.server.host, config.server.port
            );
            let body = serde_json::json!({ "type": "test_alert", "severity": severity });
            match reqwest::Client::new().post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    println!("test alert ({severity}) sent");
                    ExitCode::SUCCESS
                }
                Ok(response) => {
                    eprintln!("daemon rejected request: {}", response.status());
                    ExitCode::from(4)
                }
                Err(e) => {
                    eprintln!("cannot reach daemon at {url}: {e}");
                    ExitCode::from(4)
                }
            }
        }
    }
}
