//! The stem store: decoded stem audio plus live control state.
//!
//! Stems are loaded one at a time, then the store is sealed, which aligns
//! every stem to the shortest one. After sealing the sample data never
//! changes; only the per-stem volume and mute scalars do.

use super::control::{GainSnapshot, StemControl};
use super::decode::{EncodedSource, StemSource};
use crate::error::MixError;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Default output layout: stereo.
pub const DEFAULT_CHANNELS: u16 = 2;

/// Unique name of a stem within a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StemId(String);

impl StemId {
    /// Creates an id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single decoded stem.
#[derive(Debug, Clone)]
pub struct Stem {
    /// Unique identifier.
    id: StemId,
    /// Interleaved samples, shared with the audio thread.
    samples: Arc<[f32]>,
    /// Channels per frame (always the store's channel count).
    channels: u16,
    /// Sample rate in Hz.
    sample_rate: u32,
    /// Live volume/mute state.
    control: Arc<StemControl>,
}

impl Stem {
    /// The stem's identifier.
    pub fn id(&self) -> &StemId {
        &self.id
    }

    /// Interleaved sample data.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the sample data.
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    /// Number of frames.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Channels per frame.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Shared handle to the live control state.
    pub fn control(&self) -> Arc<StemControl> {
        Arc::clone(&self.control)
    }

    /// Current volume and mute flag.
    pub fn gain(&self) -> GainSnapshot {
        self.control.snapshot()
    }
}

/// Holds every stem of a mix, aligned to a common format and length.
#[derive(Debug)]
pub struct StemStore {
    /// Stems in load order.
    stems: Vec<Stem>,
    /// Target channel count.
    channels: u16,
    /// Established by the first successfully loaded stem.
    sample_rate: Option<u32>,
    /// Common length in frames, set by `seal()`.
    max_length: Option<usize>,
}

impl StemStore {
    /// Creates an empty store producing `channels`-channel frames.
    ///
    /// A channel count of zero is treated as mono.
    pub fn new(channels: u16) -> Self {
        Self {
            stems: Vec::new(),
            channels: channels.max(1),
            sample_rate: None,
            max_length: None,
        }
    }

    /// Decodes `source` and adds it as a new stem.
    ///
    /// Mono sources are duplicated across the store's channels. The first
    /// stem fixes the store's sample rate. On error the store is unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The store is already sealed
    /// - A stem with the same id exists
    /// - The source cannot be decoded
    /// - The channel count is neither 1 nor the store's channel count
    /// - The sample rate differs from the store's rate
    pub fn load<S: StemSource>(
        &mut self,
        id: impl Into<StemId>,
        source: S,
    ) -> Result<&Stem, MixError> {
        let id = id.into();
        if self.is_sealed() {
            return Err(MixError::Sealed);
        }
        if self.index_of(id.as_str()).is_some() {
            return Err(MixError::DuplicateStem(id.0));
        }

        let audio = source.decode().map_err(|source| MixError::Format {
            id: id.0.clone(),
            source,
        })?;

        if audio.channels != 1 && audio.channels != self.channels {
            return Err(MixError::ChannelMismatch {
                id: id.0,
                found: audio.channels,
                expected: self.channels,
            });
        }
        if let Some(expected) = self.sample_rate {
            if audio.sample_rate != expected {
                return Err(MixError::SampleRateMismatch {
                    id: id.0,
                    found: audio.sample_rate,
                    expected,
                });
            }
        }

        let audio = audio.expand_mono(self.channels);
        self.sample_rate = Some(audio.sample_rate);

        tracing::info!(
            "Loaded stem '{}': {} frames, {} Hz",
            id,
            audio.frames(),
            audio.sample_rate
        );

        self.stems.push(Stem {
            id,
            samples: audio.samples.into(),
            channels: self.channels,
            sample_rate: audio.sample_rate,
            control: Arc::new(StemControl::default()),
        });
        // Just pushed, so the slice is non-empty.
        Ok(&self.stems[self.stems.len() - 1])
    }

    /// Decodes an audio file and adds it as a new stem.
    pub fn load_file<P: AsRef<Path>>(
        &mut self,
        id: impl Into<StemId>,
        path: P,
    ) -> Result<&Stem, MixError> {
        let id = id.into();
        let source = EncodedSource::open(path.as_ref()).map_err(|source| MixError::Format {
            id: id.0.clone(),
            source,
        })?;
        self.load(id, source)
    }

    /// Truncates every stem to the shortest stem's length.
    ///
    /// After sealing no further stems may be loaded. Sealing an already
    /// sealed store is a no-op.
    ///
    /// # Returns
    ///
    /// The common length in frames.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientStems` if no stem was loaded.
    pub fn seal(&mut self) -> Result<usize, MixError> {
        if let Some(length) = self.max_length {
            return Ok(length);
        }
        let length = self
            .stems
            .iter()
            .map(Stem::frames)
            .min()
            .ok_or(MixError::InsufficientStems)?;

        let sample_len = length * self.channels as usize;
        for stem in &mut self.stems {
            if stem.samples.len() > sample_len {
                stem.samples = stem.samples[..sample_len].into();
            }
        }
        if self.stems.len() < 2 {
            tracing::warn!("Sealed with a single stem; the mix is that stem alone");
        }
        tracing::info!("Sealed {} stems at {} frames", self.stems.len(), length);

        self.max_length = Some(length);
        Ok(length)
    }

    /// Returns whether `seal()` has succeeded.
    pub fn is_sealed(&self) -> bool {
        self.max_length.is_some()
    }

    /// Common stem length in frames, once sealed.
    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    /// Sample rate shared by all stems, once one is loaded.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Channels per frame.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of loaded stems.
    pub fn len(&self) -> usize {
        self.stems.len()
    }

    /// Returns true if no stem is loaded.
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Stems in load order.
    pub fn stems(&self) -> &[Stem] {
        &self.stems
    }

    /// Stem ids in load order.
    pub fn stem_ids(&self) -> impl Iterator<Item = &StemId> + '_ {
        self.stems.iter().map(|s| &s.id)
    }

    /// Looks up a stem by id.
    pub fn stem(&self, id: &str) -> Option<&Stem> {
        self.stems.iter().find(|s| s.id.as_str() == id)
    }

    /// Position of a stem in load order.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.stems.iter().position(|s| s.id.as_str() == id)
    }

    /// Sets a stem's volume, clamped to [0.0, 1.0].
    pub fn set_volume(&self, id: &str, volume: f32) -> Result<(), MixError> {
        self.require(id)?.control.set_volume(volume);
        Ok(())
    }

    /// Mutes or unmutes a stem.
    pub fn set_mute(&self, id: &str, muted: bool) -> Result<(), MixError> {
        self.require(id)?.control.set_muted(muted);
        Ok(())
    }

    /// Current volume and mute flag of a stem.
    pub fn gain(&self, id: &str) -> Result<GainSnapshot, MixError> {
        Ok(self.require(id)?.gain())
    }

    fn require(&self, id: &str) -> Result<&Stem, MixError> {
        self.stem(id)
            .ok_or_else(|| MixError::UnknownStem(id.to_string()))
    }
}

impl Default for StemStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNELS)
    }
}
