use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use talkback::audio::{
    CpalAudioSink, CpalAudioSource, CpalCaptureDevice, WavAudioSource, list_input_devices,
    list_output_devices, suppress_audio_warnings,
};
use talkback::cli::{Cli, Commands};
use talkback::config::Config;
use talkback::llm::ChatCompletionsGenerator;
use talkback::pipeline::latency;
use talkback::remote::RemoteClient;
use talkback::stt::DeepgramRecognizer;
use talkback::tts::ElevenLabsSynthesizer;
use talkback::{AudioSource, CaptureDevice, Session, SessionParts, SessionReport, Turn};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Before the runtime starts its worker threads.
    suppress_audio_warnings();

    let cli = Cli::parse();
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Ignoring .env: {}", e);
    }
    init_logging(&cli);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(cli))
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(mut cli: Cli) -> Result<()> {
    match cli.command.take() {
        Some(Commands::Devices) => list_audio_devices(),
        Some(Commands::Config) => {
            let config = load_config(&cli)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "talkback", &mut std::io::stdout());
            Ok(())
        }
        None => converse(cli).await,
    }
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Command-line flags
/// 2. Environment variables (including `.env`)
/// 3. Custom config path from CLI (--config), or ~/.config/talkback/config.toml
/// 4. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path()?)?,
    };
    let mut config = config.with_env_overrides();

    if let Some(device) = &cli.input_device {
        config.audio.input_device = Some(device.clone());
    }
    if let Some(device) = &cli.output_device {
        config.audio.output_device = Some(device.clone());
    }
    if let Some(greeting) = &cli.greeting {
        config.conversation.greeting = Some(greeting.clone());
    }
    if cli.no_barge_in {
        config.conversation.barge_in = false;
    }
    if let Some(timeout) = cli.turn_timeout {
        config.conversation.turn_timeout_ms = timeout.as_millis() as u64;
    }
    config.validate()?;
    Ok(config)
}

fn list_audio_devices() -> Result<()> {
    println!("{}", "Input devices:".bold());
    for name in list_input_devices()? {
        println!("  {}", name);
    }
    println!("{}", "Output devices:".bold());
    for name in list_output_devices()? {
        println!("  {}", name);
    }
    Ok(())
}

async fn converse(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let session_config = config.session_config()?;
    let sample_rate = config.audio.sample_rate;

    let client = RemoteClient::new()?;
    let recognizer = DeepgramRecognizer::new(client.clone(), config.deepgram_config())?;
    let generator = ChatCompletionsGenerator::new(client.clone(), config.chat_completions_config())?;
    let synthesizer =
        ElevenLabsSynthesizer::new(client, config.synthesis.api_key.as_deref(), sample_rate)?;

    let (source, barge_in_device): (Box<dyn AudioSource>, Option<Arc<dyn CaptureDevice>>) =
        match &cli.input {
            Some(path) => (Box::new(open_wav(path, sample_rate)?), None),
            None => {
                let device = config.audio.input_device.clone();
                let source = CpalAudioSource::new(device.as_deref(), sample_rate)?;
                let monitor: Arc<dyn CaptureDevice> =
                    Arc::new(CpalCaptureDevice::new(device, sample_rate));
                (Box::new(source), Some(monitor))
            }
        };
    let sink = CpalAudioSink::new(config.audio.output_device.as_deref(), sample_rate)?;

    let handle = Session::new(session_config).start(SessionParts {
        source,
        barge_in_device,
        recognizer: Arc::new(recognizer),
        generator: Arc::new(generator),
        synthesizer: Arc::new(synthesizer),
        sink: Box::new(sink),
    })?;

    let stop = handle.stop_token();
    if std::io::stdin().is_terminal() {
        eprintln!("{} (press Enter to stop)", "Listening...".green());
        stop_on_enter(stop.clone());
    }

    let mut waiter = tokio::task::spawn_blocking(move || handle.wait());
    let report = tokio::select! {
        result = &mut waiter => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            stop.cancel();
            waiter.await?
        }
    }?;

    print_report(&report);
    Ok(())
}

fn open_wav(path: &Path, sample_rate: u32) -> Result<WavAudioSource> {
    WavAudioSource::open(path, sample_rate)
        .with_context(|| format!("Failed to open {}", path.display()))
}

// Detached: the thread ends with the process if Enter is never pressed.
fn stop_on_enter(stop: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
                stop.cancel();
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Enter-to-stop unavailable: {}", e);
    }
}

fn print_report(report: &SessionReport) {
    for Turn { role, content } in report.conversation.turns() {
        tracing::debug!("{}: {}", role, content);
    }
    eprintln!(
        "{} {} turn{}",
        "Done:".bold(),
        report.turns_completed,
        if report.turns_completed == 1 { "" } else { "s" }
    );
    if let Some(stats) = &report.latency {
        tracing::info!("{}", latency::summary(stats));
    }
}
