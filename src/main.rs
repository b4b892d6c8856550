use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use beacon_dialogue::llm::ChatCompletions;
use beacon_dialogue::pipeline::{
    AudioBuffer, Player, SpeechOutputPipeline, Synthesizer, Transcriber, TurnController, Utterance,
};
use beacon_dialogue::voice::{
    AudioCapture, AudioPlayback, MicrophoneSource, SpeechToText, SttProvider, TextToSpeech, rms,
};
use beacon_dialogue::{Config, ConversationHistory};

/// Beacon Dialogue - talk to a language model out loud
#[derive(Parser)]
#[command(name = "beacon-dialogue", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/beacon-dialogue/config.toml)
    #[arg(short, long, env = "BEACON_DIALOGUE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// TTS voice (alloy, echo, fable, onyx, nova, shimmer)
    #[arg(long)]
    voice: Option<String>,

    /// Language hint for transcription (e.g. "ru")
    #[arg(short, long)]
    language: Option<String>,

    /// Keep generating while the previous sentence plays
    #[arg(long)]
    pipelined: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Record for a fixed time and print the transcript
    Transcribe {
        /// Seconds to record
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_dialogue=info",
        1 => "info,beacon_dialogue=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    // CLI flags override file and environment
    if let Some(voice) = &cli.voice {
        config.tts.voice = voice.parse()?;
    }
    if cli.language.is_some() {
        config.stt.language = cli.language;
    }
    if cli.pipelined {
        config.dialogue.pipelined = true;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::Transcribe { seconds } => transcribe(&config, seconds).await,
        };
    }

    config.validate()?;
    tracing::debug!(?config, "loaded configuration");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                cancel.cancel();
            }
        }
    });

    let mut microphone = MicrophoneSource::open(&config.audio)?;
    tracing::info!("adjusting for ambient noise, stay quiet");
    let threshold = microphone
        .calibrate(Duration::from_millis(config.audio.calibration_ms))
        .await?;
    tracing::debug!(threshold, "speech threshold set");

    let transcriber = build_transcriber(&config)?;
    let generator = ChatCompletions::new(
        config.api_keys.openai()?,
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.temperature,
    )?;
    let speech = SpeechOutputPipeline::new(
        Box::new(build_synthesizer(&config)?),
        Box::new(AudioPlayback::new()?),
        config.tts.voice,
    );

    let mut controller = TurnController::new(
        ConversationHistory::new(config.llm.system_prompt.clone()),
        Box::new(microphone),
        transcriber,
        Box::new(generator),
        speech,
    )
    .with_segmenter(config.dialogue.segmenter())
    .with_output_mode(config.dialogue.output_mode())
    .with_language(config.stt.language.clone())
    .with_cancellation(cancel);

    tracing::info!(
        model = %config.llm.model,
        voice = %config.tts.voice,
        stt = %config.stt.provider,
        "beacon dialogue ready, start speaking"
    );

    controller.run().await;

    Ok(())
}

fn build_transcriber(config: &Config) -> anyhow::Result<Box<dyn Transcriber>> {
    let stt = match config.stt.provider {
        SttProvider::Whisper => SpeechToText::new_whisper(
            config.api_keys.openai()?,
            &config.llm.base_url,
            config.stt.model.clone(),
            config.stt.temperature,
        )?,
        SttProvider::Deepgram => {
            SpeechToText::new_deepgram(config.api_keys.deepgram()?, config.stt.model.clone())?
        }
    };
    Ok(Box::new(stt))
}

fn build_synthesizer(config: &Config) -> anyhow::Result<TextToSpeech> {
    Ok(TextToSpeech::new(
        config.api_keys.openai()?,
        &config.llm.base_url,
        config.tts.model.clone(),
        config.tts.speed,
    )?)
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let threshold = config.audio.energy_threshold;
    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("Speech threshold: {threshold:.4}");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);
        let marker = if energy > threshold { "speech" } else { "" };

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}] {}",
            i + 1,
            energy,
            peak,
            meter,
            marker
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS never crosses the threshold while you talk, lower");
    println!("[audio] energy_threshold in the config file.");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = AudioPlayback::new()?;
    println!("Output device: {}", playback.device_name());

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback.play(AudioBuffer::new(samples, sample_rate)).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = build_synthesizer(config)?;

    println!("Synthesizing speech with voice {}...", config.tts.voice);
    let audio = tts.synthesize(text, config.tts.voice).await?;
    println!(
        "Got {} samples at {} Hz ({:.2}s)",
        audio.samples.len(),
        audio.sample_rate,
        audio.duration().as_secs_f64()
    );

    println!("Playing audio...");
    let mut playback = AudioPlayback::new()?;
    playback.play(audio).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Record a fixed window and print what the STT service hears
#[allow(clippy::future_not_send)]
async fn transcribe(config: &Config, seconds: u64) -> anyhow::Result<()> {
    let transcriber = build_transcriber(config)?;

    let mut capture = AudioCapture::new()?;
    println!("Recording for {seconds} seconds...");
    capture.start()?;
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    let samples = capture.take_buffer();
    capture.stop();

    let utterance = Utterance::new(samples, capture.sample_rate());
    println!(
        "Captured {:.2}s, transcribing with {}...\n",
        utterance.duration().as_secs_f64(),
        config.stt.provider
    );

    let transcript = transcriber
        .transcribe(&utterance, config.stt.language.as_deref())
        .await?;

    println!("Text:     {}", transcript.text);
    println!(
        "Language: {}",
        transcript.language.as_deref().unwrap_or("(not reported)")
    );
    if let Some(duration) = transcript.duration {
        println!("Duration: {duration:.2}s");
    }
    if let Some(segments) = &transcript.segments {
        println!("Segments:\n{}", serde_json::to_string_pretty(segments)?);
    }

    Ok(())
}
