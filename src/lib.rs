//! stemmix - A real-time stem mixer with live per-stem control.
//!
//! This library provides the stem store, the block mixer and playback engine,
//! and the hand-height control surface used by the `stemmix` binary.

pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod stems;

// Re-export commonly used types
pub use audio::{
    export_mix_to_wav, AudioOutput, BlockMixer, CpalOutput, EngineEvent, ManualOutput,
    MixControl, MixEngine, PlaybackState, StreamFormat,
};
pub use config::{SessionConfig, StemEntry};
pub use control::{apply_hand_heights, Conductor, HandHeights};
pub use error::{DecodeError, MixError};
pub use stems::{DecodedAudio, EncodedSource, GainSnapshot, Stem, StemId, StemSource, StemStore};
