//! Command-line driver for voice-turn.
//!
//! # Startup sequence
//!
//! 1. Parse arguments.
//! 2. Load [`AppConfig`] (explicit `--config` file or the platform default),
//!    then apply environment overrides and validate.
//! 3. Initialise logging (`RUST_LOG` wins over `logging.level`).
//! 4. Build a tokio runtime and run the chosen subcommand.
//!
//! `turn` runs one full utterance → reply cycle from a WAV file and writes
//! every speech segment next to the JSON turn report.  It needs the
//! `whisper` cargo feature for transcription.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use voice_turn::{
    audio::{AudioConditioner, DebugSink, UtteranceAudio, WavDebugSink},
    config::{AppConfig, AppPaths},
    llm::ApiGenerator,
    pipeline::{CancelToken, VoiceSession},
    stt::{Transcriber, TranscriptFilter},
    tts::{CommandSynthesizer, Synthesizer},
};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Per-utterance voice turn pipeline.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "VOICE_TURN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration (API keys masked)
    Config {
        /// Print the settings file path instead
        #[arg(long)]
        path: bool,

        /// Write the effective configuration to the settings file
        #[arg(long)]
        save: bool,
    },

    /// Run the transcript quality filter on a piece of text
    Filter {
        text: String,
    },

    /// Condition a WAV file and report the result
    Condition {
        input: PathBuf,

        /// Directory to write the conditioned audio to
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// List voices known to the local synthesizer
    Voices,

    /// Synthesize text to a WAV file
    Speak {
        text: String,

        #[arg(short, long, default_value = "speech.wav")]
        output: PathBuf,
    },

    /// Run one full turn from a WAV utterance
    Turn {
        input: PathBuf,

        /// Directory for segment WAVs and the turn report
        #[arg(short, long, default_value = "turn_output")]
        out_dir: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Arguments
    let cli = Cli::parse();

    // 2. Configuration
    let settings_file = cli
        .config
        .clone()
        .unwrap_or_else(|| AppPaths::new().settings_file);
    let config = AppConfig::load_from(&settings_file)
        .and_then(AppConfig::with_env_overrides)
        .with_context(|| format!("loading configuration from {}", settings_file.display()))?;

    // 3. Logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    config.validate()?;
    log::debug!("voice-turn: configuration from {}", settings_file.display());

    // 4. Runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(cli.command, config, settings_file))
}

async fn run(command: Command, config: AppConfig, settings_file: PathBuf) -> Result<()> {
    match command {
        Command::Config { path, save } => {
            if path {
                println!("{}", settings_file.display());
                return Ok(());
            }
            if save {
                config.save_to(&settings_file)?;
                log::info!("voice-turn: settings written to {}", settings_file.display());
            }
            println!("{}", serde_json::to_string_pretty(&config.summary())?);
        }

        Command::Filter { text } => match TranscriptFilter::default().check(&text) {
            Ok(()) => println!("accepted"),
            Err(rejection) => println!("rejected by {}", rejection),
        },

        Command::Condition { input, out_dir } => {
            let raw = UtteranceAudio::read_wav(&input)?;
            println!(
                "input: {:.2}s, {} Hz, {} ch, {}",
                raw.duration_secs(),
                raw.sample_rate,
                raw.channels,
                raw.samples.kind()
            );
            match AudioConditioner::from_config(&config.audio).condition(&raw) {
                Ok(audio) => {
                    println!("conditioned: {:.2}s, {} Hz", audio.duration_secs(), audio.sample_rate);
                    if let Some(dir) = out_dir {
                        let label = input
                            .file_stem()
                            .map(|s| format!("{}_conditioned", s.to_string_lossy()))
                            .unwrap_or_else(|| "conditioned".into());
                        let sink = WavDebugSink::new(dir);
                        sink.save(&audio.samples.to_f32(), audio.sample_rate, &label)?;
                        println!("written: {}", sink.path_for(&label).display());
                    }
                }
                Err(rejection) => println!("rejected: {rejection}"),
            }
        }

        Command::Voices => {
            for voice in CommandSynthesizer::list_voices().await? {
                println!("{:<24} {:<8} {}", voice.name, voice.language, voice.description);
            }
        }

        Command::Speak { text, output } => {
            let synthesizer = CommandSynthesizer::from_config(&config.tts);
            if !synthesizer.is_ready() {
                bail!("`say` and `ffmpeg` must both be on PATH");
            }
            let audio = synthesizer.synthesize(&text).await?;
            write_wav(&output, audio.sample_rate, &audio.samples)?;
            println!("{:.2}s written to {}", audio.duration_secs(), output.display());
        }

        Command::Turn { input, out_dir } => run_turn(&config, &input, &out_dir).await?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// turn
// ---------------------------------------------------------------------------

async fn run_turn(config: &AppConfig, input: &Path, out_dir: &Path) -> Result<()> {
    let audio = UtteranceAudio::read_wav(input)?;

    let generator = ApiGenerator::from_config(&config.llm);
    if !config.llm.is_configured() {
        log::warn!(
            "voice-turn: {} has no API key; replies will be the fallback apology",
            config.llm.provider.display_name()
        );
    }

    let session = VoiceSession::new(
        config,
        load_transcriber(config)?,
        Arc::new(generator),
        Arc::new(CommandSynthesizer::from_config(&config.tts)),
    );

    // Ctrl-C interrupts the turn the way barge-in would.
    let cancel = CancelToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut turn = session.start_turn(audio, cancel);
    while let Some(segment) = turn.next_segment().await {
        let path = out_dir.join(format!("segment_{:02}.wav", segment.index));
        write_wav(&path, segment.sample_rate, &segment.samples)?;
        println!("[{}] {:?} → {}", segment.index, segment.source_text, path.display());
    }

    let Some(report) = turn.report() else {
        bail!("turn ended without a report");
    };
    let report_path = out_dir.join("report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("writing {}", report_path.display()))?;

    println!("{}", report.outcome);
    println!("{}", report.latency);
    Ok(())
}

#[cfg(feature = "whisper")]
fn load_transcriber(config: &AppConfig) -> Result<Arc<dyn Transcriber>> {
    use voice_turn::stt::WhisperTranscriber;

    let path = AppPaths::new().resolve_model(&config.stt.model);
    Ok(Arc::new(WhisperTranscriber::load(&path, &config.stt.language)?))
}

#[cfg(not(feature = "whisper"))]
fn load_transcriber(_config: &AppConfig) -> Result<Arc<dyn Transcriber>> {
    bail!("built without speech recognition; rebuild with `--features whisper`")
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
