//! Stem loading, validation and live control state.
//!
//! This module provides:
//! - Decoding of stem sources (encoded files or pre-decoded samples)
//! - A store that aligns stems to one sample rate, layout and length
//! - Lock-free per-stem volume and mute cells

pub mod control;
pub mod decode;
pub mod store;

pub use control::{clamp_volume, GainSnapshot, StemControl};
pub use decode::{DecodedAudio, EncodedSource, StemSource};
pub use store::{Stem, StemId, StemStore, DEFAULT_CHANNELS};
