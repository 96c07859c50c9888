//! Monitor CLI - command-line front end for the HRV cognitive-state pipeline.
//!
//! Commands:
//! - stream: scan for a device, connect, and stream ndjson pipeline events
//! - doctor: print the resolved configuration and BLE adapter availability

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use hrv_monitor::{AppConfig, PipelineOrchestrator, SensorClient};

#[derive(Parser)]
#[command(name = "monitor")]
#[command(author = "Synheart AI Inc")]
#[command(version)]
#[command(about = "Stream real-time cognitive-state inference from a wearable HR sensor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan, connect, and stream ndjson pipeline events to stdout
    Stream {
        /// Device name substring to match against BLE advertisements
        #[arg(long)]
        device_name: Option<String>,

        /// Start a recording session alongside the stream
        #[arg(long)]
        session: Option<String>,
    },

    /// Print resolved configuration and BLE adapter availability
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}", CliError::from(MonitorCliError::Io(e)).to_json());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", CliError::from(e).to_json());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), MonitorCliError> {
    match cli.command {
        Commands::Stream { device_name, session } => cmd_stream(device_name, session).await,
        Commands::Doctor { json } => cmd_doctor(json).await,
    }
}

async fn cmd_stream(device_name: Option<String>, session: Option<String>) -> Result<(), MonitorCliError> {
    let mut config = AppConfig::from_env();
    if let Some(name) = device_name {
        config.ble.device_name = name;
    }

    let pipeline = Arc::new(PipelineOrchestrator::new(config.clone()));
    pipeline.on_event(|event| {
        println!("{}", event.to_json());
    });

    if let Some(session_id) = session {
        pipeline
            .start_session(
                session_id,
                Box::new(hrv_monitor::InMemoryRecorder::new()),
                0.0,
            )
            .map_err(MonitorCliError::Pipeline)?;
    }

    let client = Arc::new(SensorClient::new(config.ble));

    {
        let pipeline = pipeline.clone();
        client
            .on_sample(move |sample| {
                if sample.ppi_ms.is_empty() {
                    pipeline.receive_hr(sample.hr, sample.timestamp);
                } else {
                    pipeline.receive_ppi(&sample);
                }
            })
            .await;
    }

    {
        let pipeline = pipeline.clone();
        let client_for_state = client.clone();
        client
            .on_state_change(move |_state| {
                let pipeline = pipeline.clone();
                let client = client_for_state.clone();
                tokio::spawn(async move {
                    let info = client.device_info().await;
                    pipeline.device_state_changed(info);
                });
            })
            .await;
    }

    {
        let pipeline = pipeline.clone();
        client
            .on_unexpected_disconnect(move || pipeline.force_stop_session())
            .await;
    }

    client.run().await.map_err(MonitorCliError::Pipeline)
}

async fn cmd_doctor(json: bool) -> Result<(), MonitorCliError> {
    let config = AppConfig::from_env();
    let adapter_available = btleplug::platform::Manager::new()
        .await
        .map(|_| true)
        .unwrap_or(false);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "window_size_sec": config.signal.window_size_sec,
                "window_step_sec": config.signal.window_step_sec,
                "score_smoothing_alpha": config.ml.score_smoothing_alpha,
                "device_name": config.ble.device_name,
                "ble_adapter_available": adapter_available,
            })
        );
    } else {
        println!("window_size_sec:          {}", config.signal.window_size_sec);
        println!("window_step_sec:          {}", config.signal.window_step_sec);
        println!("score_smoothing_alpha:    {}", config.ml.score_smoothing_alpha);
        println!("device_name:              {}", config.ble.device_name);
        println!("ble_adapter_available:    {adapter_available}");
    }

    Ok(())
}

#[derive(Debug)]
enum MonitorCliError {
    Io(std::io::Error),
    Pipeline(hrv_monitor::CoreError),
}

impl From<std::io::Error> for MonitorCliError {
    fn from(e: std::io::Error) -> Self {
        MonitorCliError::Io(e)
    }
}

struct CliError {
    code: &'static str,
    message: String,
}

impl From<MonitorCliError> for CliError {
    fn from(e: MonitorCliError) -> Self {
        match e {
            MonitorCliError::Io(e) => CliError { code: "IO_ERROR", message: e.to_string() },
            MonitorCliError::Pipeline(e) => CliError { code: "PIPELINE_ERROR", message: e.to_string() },
        }
    }
}

impl CliError {
    fn to_json(&self) -> String {
        serde_json::json!({ "code": self.code, "message": self.message }).to_string()
    }
}
