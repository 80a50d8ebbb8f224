//! Error types for stem loading, playback lifecycle and control.

use thiserror::Error;

/// Errors produced while turning a byte source into sample frames.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The underlying source could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The data is not in a format the decoder understands.
    #[error("Unrecognized audio data: {0}")]
    Unrecognized(String),

    /// The source decoded to zero frames.
    #[error("Audio source contains no frames")]
    Empty,

    /// The source reports zero channels.
    #[error("Audio source reports zero channels")]
    ZeroChannels,

    /// The sample count is not a whole number of frames.
    #[error("{samples} samples do not divide into {channels}-channel frames")]
    PartialFrame { samples: usize, channels: u16 },
}

/// Errors surfaced by the stem store and the mix engine.
///
/// None of these are raised from the realtime render path; every variant is
/// returned synchronously to the caller that triggered it.
#[derive(Error, Debug)]
pub enum MixError {
    /// A stem source could not be decoded.
    #[error("Failed to decode stem '{id}': {source}")]
    Format {
        id: String,
        #[source]
        source: DecodeError,
    },

    /// A stem's channel count cannot be reconciled with the store's layout.
    #[error("Stem '{id}' has {found} channels, expected 1 or {expected}")]
    ChannelMismatch { id: String, found: u16, expected: u16 },

    /// A stem's sample rate differs from the rate set by the first stem.
    #[error("Stem '{id}' is {found}Hz, store is {expected}Hz")]
    SampleRateMismatch { id: String, found: u32, expected: u32 },

    /// `seal()` was called on an empty store.
    #[error("At least one stem is required")]
    InsufficientStems,

    /// A stem with the same id is already loaded.
    #[error("Stem '{0}' is already loaded")]
    DuplicateStem(String),

    /// The store was sealed; no more stems may be loaded.
    #[error("Stem store is sealed")]
    Sealed,

    /// Playback was requested before the store was ready.
    #[error("Mixer not ready: {0}")]
    NotReady(&'static str),

    /// A control call named a stem that does not exist.
    #[error("Unknown stem: {0}")]
    UnknownStem(String),

    /// The audio output could not be opened or started.
    #[error("Audio output error: {0}")]
    Output(String),
}
