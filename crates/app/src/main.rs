use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use voxgate_core::constants::TASK_QUEUE_CAPACITY;
use voxgate_core::playback::spawn_watchdog;
use voxgate_core::{EchoCanceller, Pipeline, SharedState, WebRtcClassifier, WorkerPool};

mod assistant;
mod audio;
mod car;
mod config;
mod dialogue;
mod services;
mod trigger;

use assistant::{Assistant, AssistantSettings, Collaborators};
use config::AppConfig;

#[derive(Parser)]
#[command(name = "voxgate")]
#[command(about = "Voxgate: voice assistant front-end with echo cancellation and barge-in", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio devices
    List,
    /// Run the assistant in foreground (press Ctrl+C to stop)
    Run {
        #[arg(short, long)]
        input: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        /// Transcription endpoint
        #[arg(long)]
        transcribe_url: Option<String>,
        /// Speech synthesis endpoint
        #[arg(long)]
        synthesize_url: Option<String>,
        /// Chat endpoint
        #[arg(long)]
        chat_url: Option<String>,
        /// Car websocket endpoint
        #[arg(long)]
        car_url: Option<String>,
        /// Disable echo cancellation
        #[arg(long)]
        no_aec: bool,
    },
    /// Show the configuration file and its effective contents
    Config {
        /// Write the effective configuration to disk
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => audio::list_devices()?,
        Commands::Run {
            input,
            output,
            transcribe_url,
            synthesize_url,
            chat_url,
            car_url,
            no_aec,
        } => {
            let mut config = AppConfig::load();
            let overrides = [
                (&mut config.input_device, input),
                (&mut config.output_device, output),
                (&mut config.transcribe_url, transcribe_url),
                (&mut config.synthesize_url, synthesize_url),
                (&mut config.chat_url, chat_url),
                (&mut config.car_url, car_url),
            ];
            for (field, value) in overrides {
                if let Some(value) = value {
                    *field = value;
                }
            }
            if no_aec {
                config.echo_cancel_enabled = false;
            }
            run(config)?;
        }
        Commands::Config { write } => {
            let config = AppConfig::load();
            match config::config_path() {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("Config file: unavailable"),
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            if write {
                let path = config.save()?;
                println!("Written to {}", path.display());
            }
        }
    }

    Ok(())
}

fn run(config: AppConfig) -> Result<()> {
    let pipeline_config = config.pipeline();
    pipeline_config.validate().context("Invalid pipeline configuration")?;

    let sink = Arc::new(audio::CpalSink::new(&config.output_device)?);
    let shared = SharedState::new(&pipeline_config, sink);

    let http = services::HttpServices::new(&config)?;
    let services = Collaborators {
        transcriber: Box::new(http.clone()),
        responder: Box::new(http.clone()),
        synthesizer: Box::new(http),
        car: Box::new(car::CarLink::new(&config.car_url)),
    };
    let settings = AssistantSettings {
        sample_rate: pipeline_config.sample_rate,
        session_tail_samples: pipeline_config.session_tail_samples(),
        artifact_dir: config.artifact_dir(),
        acknowledgement: config.acknowledgement.clone(),
        system_prompt: config.system_prompt.clone(),
    };
    let pool = WorkerPool::spawn(
        Assistant::new(shared.clone(), services, settings),
        TASK_QUEUE_CAPACITY,
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let watchdog = spawn_watchdog(shared.playback.clone(), running.clone())
        .context("Failed to spawn watchdog thread")?;

    let echo = if pipeline_config.echo_cancel_enabled {
        EchoCanceller::with_aec3(pipeline_config.sample_rate, pipeline_config.block_size)
    } else {
        EchoCanceller::passthrough()
    };
    let classifier = WebRtcClassifier::new(pipeline_config.sample_rate, pipeline_config.vad_mode)?;
    let (detector, pressed) = trigger::KeyboardTrigger::new();
    if config.manual_trigger {
        trigger::spawn_stdin_listener(pressed)?;
    } else {
        log::warn!("Manual trigger disabled: no wake word source is active");
    }

    let pipeline = Pipeline::new(
        &pipeline_config,
        shared.clone(),
        echo,
        Box::new(detector),
        Box::new(classifier),
        pool.sender(),
    )?;
    let engine = audio::AudioEngine::start(&config.input_device, pipeline)?;

    println!("Voxgate active. Press Enter to wake, Ctrl+C to stop.");

    // Graceful shutdown handling
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\nShutting down gracefully...");
        r.store(false, Ordering::Relaxed);
    })?;

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    drop(engine);
    shared.playback.interrupt("shutdown");
    if watchdog.join().is_err() {
        log::error!("Watchdog thread panicked");
    }
    pool.shutdown();

    println!("Voxgate stopped.");
    Ok(())
}
