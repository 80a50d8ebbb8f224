//! stemmix - A real-time stem mixer driven by hand heights.
//!
//! Plays several audio stems in a loop and lets an external tracker steer
//! each stem's volume by piping hand heights into stdin, one frame per line.
//!
//! # Usage
//!
//! ```bash
//! tracker | stemmix drums.wav bass.wav keys.wav
//! stemmix --session live.json
//! stemmix --export mix.wav --passes 2 drums.wav bass.wav
//! ```

use stemmix::audio::{export_mix_to_wav, CpalOutput, EngineEvent, MixEngine};
use stemmix::config::SessionConfig;
use stemmix::control::{parse_heights, Conductor, HandHeights};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// How often the main thread checks for device faults and feed shutdown.
const EVENT_POLL: Duration = Duration::from_millis(200);

/// Command-line options for the application.
struct CliOptions {
    /// Session file to load stems and settings from.
    session: Option<PathBuf>,
    /// Stem files given directly on the command line.
    stems: Vec<PathBuf>,
    /// Output channel count override.
    channels: Option<u16>,
    /// Output device name override.
    device: Option<String>,
    /// Fixed block size override, in frames.
    buffer_frames: Option<u32>,
    /// Control rate override, in Hz.
    control_rate: Option<f32>,
    /// Render the mix to this WAV file instead of playing it.
    export: Option<PathBuf>,
    /// Loop passes to render when exporting.
    passes: u32,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `--session <path>` or `-s <path>`: Load a JSON session file
    /// - `--channels <n>` or `-c <n>`: Output channel count
    /// - `--device <name>` or `-d <name>`: Output device name
    /// - `--buffer <frames>` or `-b <frames>`: Fixed output block size
    /// - `--rate <hz>` or `-r <hz>`: Hand-height control rate
    /// - `--export <path>` or `-e <path>`: Write a WAV mixdown and exit
    /// - `--passes <n>` or `-p <n>`: Loop passes for `--export`
    /// - `--help` or `-h`: Print help and exit
    /// - Positional arguments: stem audio files
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut options = Self {
            session: None,
            stems: Vec::new(),
            channels: None,
            device: None,
            buffer_frames: None,
            control_rate: None,
            export: None,
            passes: 1,
        };
        let mut i = 1;

        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--session" | "-s" => {
                    options.session = Some(PathBuf::from(value(&args, &mut i)?));
                }
                "--channels" | "-c" => {
                    let raw = value(&args, &mut i)?;
                    options.channels = Some(raw.parse().context("Invalid channel count")?);
                }
                "--device" | "-d" => {
                    options.device = Some(value(&args, &mut i)?.to_string());
                }
                "--buffer" | "-b" => {
                    let raw = value(&args, &mut i)?;
                    options.buffer_frames = Some(raw.parse().context("Invalid buffer size")?);
                }
                "--rate" | "-r" => {
                    let raw = value(&args, &mut i)?;
                    options.control_rate = Some(raw.parse().context("Invalid control rate")?);
                }
                "--export" | "-e" => {
                    options.export = Some(PathBuf::from(value(&args, &mut i)?));
                }
                "--passes" | "-p" => {
                    let raw = value(&args, &mut i)?;
                    options.passes = raw.parse().context("Invalid pass count")?;
                }
                "--help" | "-h" => {
                    print_help(args.first().map(String::as_str).unwrap_or("stemmix"));
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    bail!("Unknown option: {} (use --help for usage information)", other)
                }
                other => options.stems.push(PathBuf::from(other)),
            }
            i += 1;
        }

        Ok(options)
    }

    /// Merges the session file (if any), positional stems and overrides.
    fn into_session(self) -> Result<(SessionConfig, Option<PathBuf>, u32)> {
        let mut config = match &self.session {
            Some(path) => SessionConfig::load_from_file(path)?,
            None => SessionConfig::default(),
        };
        config.stems.extend(SessionConfig::from_paths(self.stems).stems);

        if let Some(channels) = self.channels {
            config.channels = channels;
        }
        if self.device.is_some() {
            config.device = self.device;
        }
        if self.buffer_frames.is_some() {
            config.buffer_frames = self.buffer_frames;
        }
        if let Some(rate) = self.control_rate {
            config.control_rate_hz = rate;
        }
        if config.stems.is_empty() {
            bail!("No stems given (use --help for usage information)");
        }
        Ok((config, self.export, self.passes))
    }
}

/// Returns the value following the flag at `args[*i]`, advancing `i`.
fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{} requires a value", flag))
}

fn print_help(program: &str) {
    eprintln!("stemmix - Real-time stem mixer");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS] [STEMS...]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --session PATH     Load stems and settings from a JSON session file");
    eprintln!("  -c, --channels N       Output channel count (default 2)");
    eprintln!("  -d, --device NAME      Output device (default: system default)");
    eprintln!("  -b, --buffer FRAMES    Fixed output block size");
    eprintln!("  -r, --rate HZ          Hand-height control rate (default 10)");
    eprintln!("  -e, --export PATH      Render a WAV mixdown instead of playing");
    eprintln!("  -p, --passes N         Loop passes to render with --export (default 1)");
    eprintln!("  -h, --help             Print this help message");
    eprintln!();
    eprintln!("While playing, each stdin line sets stem volumes from hand heights,");
    eprintln!("e.g. \"0.4 0.9\". An empty line means no hands. Close stdin to quit.");
}

/// Reads hand-height lines from stdin and forwards them.
fn spawn_stdin_feed(frames: Sender<HandHeights>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            };
            match parse_heights(&line) {
                Ok(heights) => {
                    if frames.send(heights).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Ignoring malformed height line {:?}: {}", line, e),
            }
        }
    })
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let (config, export, passes) = cli.into_session()?;
    let store = config.build_store().context("Failed to load stems")?;

    if let Some(path) = export {
        export_mix_to_wav(
            &store,
            &path,
            passes,
            Some(|progress: f32| eprint!("\rExporting... {:>3.0}%", progress * 100.0)),
        )?;
        eprintln!();
        tracing::info!("Wrote {}", path.display());
        return Ok(());
    }

    let mut engine = match (&config.device, config.buffer_frames) {
        (None, None) => MixEngine::with_default_output(store),
        (device, buffer_frames) => {
            MixEngine::new(store, CpalOutput::new(device.clone(), buffer_frames))
        }
    };
    let events = engine.events();
    engine.play().context("Failed to start playback")?;

    let (frames_tx, frames_rx) = crossbeam_channel::unbounded();
    let conductor = Conductor::new(engine.control(), frames_rx, config.control_rate_hz);
    let conductor = thread::spawn(move || conductor.run());
    let _feed = spawn_stdin_feed(frames_tx);

    loop {
        match events.recv_timeout(EVENT_POLL) {
            Ok(EngineEvent::DeviceFault(reason)) => {
                engine.stop();
                bail!("Playback stopped: {}", reason);
            }
            Err(RecvTimeoutError::Timeout) => {
                if conductor.is_finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::info!("Stopping playback...");
    engine.stop();
    Ok(())
}
