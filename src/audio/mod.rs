//! Audio engine for real-time stem mixing.
//!
//! This module provides the playback side of the mixer. It supports:
//! - Block-based mixing with per-stem gain, saturation and looping
//! - Playback lifecycle with a cpal output or a host-driven output
//! - A thread-safe control handle for live volume and mute changes
//! - Offline WAV mixdown

pub mod engine;
pub mod export;
pub mod mixer;
pub mod output;

pub use engine::{EngineEvent, MixControl, MixEngine, PlaybackState};
pub use export::export_mix_to_wav;
pub use mixer::BlockMixer;
pub use output::{AudioOutput, CpalOutput, ManualOutput, StreamFormat};
