use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use lyra_voice::audio::capture::CpalMic;
use lyra_voice::audio::pcm;
use lyra_voice::audio::playback::Speaker;
use lyra_voice::config::{CaptureConfig, PlaybackConfig};
use lyra_voice::{AudioSink, Config, MicSource, Notification, Session};

/// Lyra - realtime voice session client
#[derive(Parser)]
#[command(name = "lyra", version, about)]
struct Cli {
    /// Path to a config file (defaults to config.toml in the config dir)
    #[arg(short, long, env = "LYRA_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket URL of the speech endpoint (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Record through the capture pipeline and write a WAV file
    Record {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Output file path
        #[arg(short, long, default_value = "recording.wav")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,lyra_voice=info",
        1 => "info,lyra_voice=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::Record { duration, output } => record(duration, &output).await,
        };
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.url {
        config.endpoint.url = url;
    }
    if config.endpoint.url.is_empty() {
        anyhow::bail!(
            "no endpoint configured; pass --url, set LYRA_ENDPOINT_URL, \
             or add endpoint.url to config.toml"
        );
    }

    tracing::info!(url = %config.endpoint.url, "starting lyra");

    let (session, handle, notifications) = Session::new(config);

    tokio::spawn(report_notifications(notifications));

    // Start talking immediately; ctrl-c ends the conversation and the loop
    handle.start().await?;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            let _ = handle.stop().await;
        }
    });

    session.run().await?;
    Ok(())
}

/// Print session notifications for the terminal user
async fn report_notifications(mut notifications: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::StateChanged(state) => println!("[{state}]"),
            Notification::Message(entry) => println!("{}: {}", entry.origin, entry.text),
            Notification::Failure { kind, message } => eprintln!("error ({kind}): {message}"),
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = CaptureConfig::default();
    let sample_rate = config.sample_rate;
    let frame_len = config.frame_len;

    let mut mic = CpalMic::new(config);
    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<f32>>(8);
    mic.start(frame_tx)?;

    println!("Sample rate: {sample_rate} Hz, frame: {frame_len} samples");
    println!("---");

    let mut window: Vec<f32> = Vec::new();
    let mut second = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;

    loop {
        tokio::select! {
            Some(frame) = frame_rx.recv() => window.extend_from_slice(&frame),
            _ = ticker.tick() => {
                second += 1;
                let energy = calculate_rms(&window);
                let peak = window.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

                // Visual meter
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let meter_len = (energy * 100.0).min(50.0) as usize;
                let meter: String = "\u{2588}".repeat(meter_len) + &" ".repeat(50 - meter_len);

                println!("[{second:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
                window.clear();

                if second >= duration {
                    break;
                }
            }
        }
    }

    mic.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let config = PlaybackConfig::default();
    let sample_rate = config.sample_rate;
    let mut speaker = Speaker::new(&config);

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    speaker.play(
        samples,
        Box::new(move || {
            let _ = done_tx.send(());
        }),
    )?;
    done_rx.await.ok();
    speaker.stop();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Record through the capture pipeline and write a 16-bit mono WAV
#[allow(clippy::future_not_send, clippy::cast_precision_loss)]
async fn record(duration: u64, output: &Path) -> anyhow::Result<()> {
    println!("Recording {duration} seconds to {}...", output.display());

    let config = CaptureConfig::default();
    let sample_rate = config.sample_rate;

    let mut mic = CpalMic::new(config);
    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<f32>>(8);
    mic.start(frame_tx)?;

    let mut samples: Vec<f32> = Vec::new();
    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(frame) = frame_rx.recv() => samples.extend_from_slice(&frame),
            () = &mut deadline => break,
        }
    }

    mic.stop();

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)?;
    for sample in pcm::encode(&samples) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    println!(
        "Wrote {} samples ({:.1}s) to {}",
        samples.len(),
        samples.len() as f32 / sample_rate as f32,
        output.display()
    );

    Ok(())
}
