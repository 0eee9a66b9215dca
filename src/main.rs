use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use waav_voice::{
    EngineConfig, Notification, SessionOrchestrator, TurnDetectionConfig, WavFileDevice,
    core::audio::AudioDevice,
};

/// WaaV Voice - Real-time spoken conversation engine
#[derive(Parser, Debug)]
#[command(name = "waav-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hold one conversation using WAV files as microphone and speaker
    Run {
        /// Mono 16-bit WAV file to send as microphone audio; silence when omitted
        #[arg(short = 'i', long = "input", value_name = "WAV")]
        input: Option<PathBuf>,

        /// WAV file receiving the assistant's audio
        #[arg(short = 'o', long = "output", value_name = "WAV")]
        output: Option<PathBuf>,

        /// System instructions, overriding the configuration
        #[arg(long)]
        instructions: Option<String>,

        /// Output voice, overriding the configuration
        #[arg(long)]
        voice: Option<String>,

        /// Disable server turn detection and commit the turn once the input ends
        #[arg(long)]
        manual_turns: bool,

        /// How long to keep listening after the input ends (milliseconds)
        #[arg(long, default_value_t = 5000)]
        linger_ms: u64,
    },

    /// List the available virtual audio devices
    Devices {
        /// Input WAV file to include in the listing
        #[arg(short = 'i', long = "input", value_name = "WAV")]
        input: Option<PathBuf>,
    },

    /// Load and validate configuration, then print it with secrets redacted
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            println!("Loading configuration from {}", path.display());
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::from_env()?,
    };
    Ok(config)
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::MessageAppended(message) => {
            println!("[{}] {}", message.role, message.content);
        }
        Notification::StatusChanged { previous, current } => {
            println!("status: {previous} -> {current}");
        }
        Notification::Error { category, message } => {
            eprintln!("error ({category}): {message}");
        }
        Notification::MicrophonesChanged(devices) => {
            println!("microphones: {} available", devices.len());
        }
    }
}

async fn run_session(
    config: EngineConfig,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    manual_turns: bool,
    linger: Duration,
) -> anyhow::Result<()> {
    let adapter = config.create_adapter()?;
    let device = Arc::new(WavFileDevice::new(
        config.wav_device_config(input.clone(), output),
    ));
    let session = SessionOrchestrator::new(adapter, device.clone(), config.orchestrator_config());

    let mut notifications = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => print_notification(&notification),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut settings = config.settings.clone();
    if manual_turns {
        settings.turn_detection = TurnDetectionConfig::None;
    }

    if let Err(e) = session.start(settings).await {
        session.stop().await;
        printer.abort();
        return Err(anyhow!("Failed to start session: {e}"));
    }
    println!("Session active, press Ctrl-C to stop");

    let finished = async {
        if input.is_some() {
            device.wait_capture_finished().await;
            info!("Input finished");
            if manual_turns {
                if let Err(e) = session.commit_turn().await {
                    warn!(error = %e, "Failed to commit turn");
                }
            }
            tokio::time::sleep(linger).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = finished => {}
        _ = tokio::signal::ctrl_c() => println!("Interrupted"),
    }

    let info = session.session_info();
    session.stop().await;
    device.finalize()?;
    printer.abort();

    let stats = session.pipeline_stats();
    println!(
        "Session {} ended: {} history entries, {} chunks sent, {} chunks played, {} samples recorded",
        info.session_id.as_deref().unwrap_or("-"),
        session.history().len(),
        stats.capture_chunks_forwarded,
        stats.playback.chunks_accepted,
        device.samples_recorded()
    );
    if let Some(error) = info.last_error {
        println!("Last error: {error}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output,
            instructions,
            voice,
            manual_turns,
            linger_ms,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if instructions.is_some() {
                config.settings.instructions = instructions;
            }
            if let Some(voice) = voice {
                config.settings.voice = voice;
            }
            run_session(
                config,
                input,
                output,
                manual_turns,
                Duration::from_millis(linger_ms),
            )
            .await
        }
        Commands::Devices { input } => {
            let device = WavFileDevice::new(waav_voice::WavFileDeviceConfig {
                input_path: input,
                ..Default::default()
            });
            for info in device.list_devices() {
                let marker = if info.is_default { "*" } else { " " };
                println!("{marker} {:<14} {:?}  {}", info.id, info.kind, info.name);
            }
            Ok(())
        }
        Commands::CheckConfig => {
            let config = load_config(cli.config.as_ref())?;
            println!("{config:#?}");
            match config.create_adapter() {
                Ok(adapter) => println!("Provider ready: {}", adapter.provider_info()),
                Err(e) => println!("Provider not ready: {e}"),
            }
            Ok(())
        }
    }
}
