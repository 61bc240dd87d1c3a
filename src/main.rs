use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use alma_gateway::api::ApiServerBuilder;
use alma_gateway::audio::write_pcm16_wav;
use alma_gateway::chat::{ChatCompletion, Conversation, OpenAiChat};
use alma_gateway::pipeline::SessionSettings;
use alma_gateway::speech::TextToSpeech;
use alma_gateway::{Config, HttpEngines};

/// Alma - real-time voice gateway for AI assistants
#[derive(Parser)]
#[command(name = "alma", version, about)]
struct Cli {
    /// Port to listen on (overrides configuration)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default)
    Serve,
    /// Synthesize text once and save it as a WAV file
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
        /// Output file
        #[arg(short, long, default_value = "alma-tts.wav")]
        out: PathBuf,
    },
    /// Stream one chat completion to stdout
    TestChat {
        /// User message
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,alma_gateway=info",
        1 => "info,alma_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.port).await,
        Command::TestTts { text, out } => test_tts(&text, &out).await,
        Command::TestChat { text } => test_chat(&text).await,
    }
}

/// Run the gateway until interrupted
async fn serve(port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = port {
        config.server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    let engines = HttpEngines::from_config(&config)?;
    let output_rate = engines.output_sample_rate();

    let server = ApiServerBuilder::new(
        Arc::new(engines),
        SessionSettings::from_config(&config),
        config.server.port,
    )
    .output_sample_rate(output_rate)
    .static_dir(config.server.static_dir.clone())
    .build();

    tracing::info!(
        port = config.server.port,
        barge_in = ?config.pipeline.barge_in,
        "alma gateway ready"
    );

    server.run(shutdown_signal()).await?;
    Ok(())
}

/// Resolve once Ctrl+C is pressed
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}

/// Test TTS output
async fn test_tts(text: &str, out: &std::path::Path) -> anyhow::Result<()> {
    let config = Config::resolve()?;
    let tts = TextToSpeech::from_config(
        &config.tts,
        &config.api_keys,
        config.audio.output_sample_rate,
    )?;

    println!("Synthesizing: \"{text}\"");
    let started = Instant::now();
    let pcm = tts.synthesize(text).await?;
    let elapsed = started.elapsed();

    write_pcm16_wav(out, &pcm, tts.sample_rate())?;

    #[allow(clippy::cast_precision_loss)]
    let seconds = pcm.len() as f64 / 2.0 / f64::from(tts.sample_rate());
    println!(
        "Wrote {:.1}s of audio to {} in {}ms",
        seconds,
        out.display(),
        elapsed.as_millis()
    );
    Ok(())
}

/// Test streaming chat completion
async fn test_chat(text: &str) -> anyhow::Result<()> {
    let config = Config::resolve()?;
    let chat = OpenAiChat::from_config(&config.llm, &config.api_keys)?;

    let mut conversation = Conversation::new(&config.llm.system_prompt);
    conversation.push_user(text);

    let started = Instant::now();
    let mut first_token = None;
    let mut stream = chat.stream(conversation.turns()).await?;
    let mut stdout = std::io::stdout();

    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if first_token.is_none() {
            first_token = Some(started.elapsed());
        }
        write!(stdout, "{delta}")?;
        stdout.flush()?;
    }
    println!();

    if let Some(ttft) = first_token {
        eprintln!(
            "first token: {}ms, total: {}ms",
            ttft.as_millis(),
            started.elapsed().as_millis()
        );
    }
    Ok(())
}
