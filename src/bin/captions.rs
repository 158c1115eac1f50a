//! Demo captioner: stream a WAV file through a live recognition session
//! and print the resulting caption segments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Parser;
use log::info;

use caption_core::error::AudioError;
use caption_core::host::{AudioSource, MemoryKvStore, VideoClock};
use caption_core::{BackendMode, CoreConfig, CoreEvent, CredentialStore, SessionManager};

#[derive(Default, Debug, Copy, Clone, clap::ValueEnum)]
enum Level {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

impl From<Level> for log::LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => log::LevelFilter::Error,
            Level::Warn => log::LevelFilter::Warn,
            Level::Info => log::LevelFilter::Info,
            Level::Debug => log::LevelFilter::Debug,
            Level::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Parser)]
#[command(name = "captions")]
#[command(about = "Stream a WAV file to the recognition service and print captions", long_about = None)]
struct Cli {
    /// PCM WAV file to stream (16-bit samples)
    wav: std::path::PathBuf,

    /// API key; falls back to the DEEPGRAM_API_KEY environment variable
    #[arg(long)]
    api_key: Option<String>,

    #[arg(long, default_value_t = String::from("api.deepgram.com"))]
    host: String,

    #[arg(long, default_value_t = String::from("nova-2"))]
    model: String,

    #[arg(long, default_value_t = String::from("en-US"))]
    language: String,

    /// Use the windowed batch backend instead of the streaming session
    #[arg(long)]
    batch: bool,

    #[arg(short, long, default_value_t = Level::Info)]
    #[clap(value_enum)]
    level: Level,
}

/// Plays a decoded WAV file into the pipeline at real-time pace.
struct FileAudioSource {
    sample_rate: u32,
    channels: u16,
    samples: Option<Vec<f32>>,
    stop_flag: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl FileAudioSource {
    fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let (sample_rate, channels, samples) = parse_wav(&bytes)?;
        info!(
            "loaded {} ({} Hz, {} ch, {:.1}s)",
            path.display(),
            sample_rate,
            channels,
            samples.len() as f64 / channels as f64 / sample_rate as f64
        );
        Ok(Self {
            sample_rate,
            channels,
            samples: Some(samples),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }
}

impl AudioSource for FileAudioSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&mut self, mut on_block: Box<dyn FnMut(&[f32]) + Send>) -> Result<(), AudioError> {
        let samples = self
            .samples
            .take()
            .ok_or_else(|| AudioError::CaptureFailed("source already started".to_string()))?;

        let block = (self.sample_rate as usize / 50) * self.channels as usize;
        let stop_flag = Arc::clone(&self.stop_flag);
        self.handle = Some(std::thread::spawn(move || {
            for chunk in samples.chunks(block) {
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                on_block(chunk);
                std::thread::sleep(Duration::from_millis(20));
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn parse_wav(bytes: &[u8]) -> anyhow::Result<(u32, u16, Vec<f32>)> {
    if bytes.len() < 44 || &bytes[..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        bail!("not a RIFF/WAVE file");
    }

    let mut sample_rate = 0u32;
    let mut channels = 0u16;
    let mut data: Option<&[u8]> = None;

    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let body_end = (offset + 8 + size).min(bytes.len());
        let body = &bytes[offset + 8..body_end];

        match id {
            b"fmt " if body.len() >= 16 => {
                let format = u16::from_le_bytes(body[0..2].try_into().unwrap());
                let bits = u16::from_le_bytes(body[14..16].try_into().unwrap());
                if format != 1 || bits != 16 {
                    bail!("only 16-bit PCM WAV is supported");
                }
                channels = u16::from_le_bytes(body[2..4].try_into().unwrap());
                sample_rate = u32::from_le_bytes(body[4..8].try_into().unwrap());
            }
            b"data" => data = Some(body),
            _ => {}
        }
        offset = body_end + (size & 1);
    }

    let data = data.context("no data chunk")?;
    if sample_rate == 0 || channels == 0 {
        bail!("no fmt chunk");
    }

    let samples: Vec<f32> = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    Ok((sample_rate, channels, samples))
}

/// The demo has no player; the clock just advances with wall time.
struct WallClock {
    started: std::time::Instant,
}

#[async_trait]
impl VideoClock for WallClock {
    async fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.level.into())
        .init();

    let api_key = cli
        .api_key
        .or_else(|| std::env::var("DEEPGRAM_API_KEY").ok())
        .context("no API key: pass --api-key or set DEEPGRAM_API_KEY")?;

    let config = CoreConfig::new(&cli.model, &cli.language).with_host(&cli.host);

    let credentials = CredentialStore::new(Arc::new(MemoryKvStore::new()), &cli.host);
    let auth = credentials
        .verify_and_save(&api_key)
        .await
        .context("key verification failed")?;
    info!("key verified for project {}", auth.project_id);

    let source = FileAudioSource::load(&cli.wav)?;

    let mode = if cli.batch {
        BackendMode::Batch
    } else {
        BackendMode::Streaming
    };
    let mut manager = SessionManager::new(
        config,
        credentials,
        Arc::new(WallClock {
            started: std::time::Instant::now(),
        }),
    )
    .with_mode(mode);

    let mut events = manager.enable(Box::new(source)).await?;
    while let Some(event) = events.recv().await {
        match event {
            CoreEvent::Segment(segment) => {
                println!(
                    "[{:7.2}s - {:7.2}s] {}",
                    segment.start_sec, segment.end_sec, segment.text
                );
            }
            CoreEvent::Interim(transcript) => {
                eprint!("\r… {}        ", transcript.text);
            }
            CoreEvent::SessionState(state) => info!("session state: {:?}", state),
            CoreEvent::Error { kind, message } => {
                eprintln!("error [{}]: {}", kind, message);
            }
        }
    }

    manager.disable().await;
    Ok(())
}
