//! Block mixer: the code that runs on the audio thread.
//!
//! A `BlockMixer` is built from a sealed store when playback starts and is
//! moved into the output callback. It owns the playback position and a gain
//! scratch buffer sized up front, so `render` never allocates, locks or
//! fails.

use crate::error::MixError;
use crate::stems::{StemControl, StemStore};
use std::sync::Arc;

/// One stem as seen from the audio thread.
struct Lane {
    samples: Arc<[f32]>,
    control: Arc<StemControl>,
}

/// Produces mixed output blocks and tracks the loop position.
pub struct BlockMixer {
    lanes: Vec<Lane>,
    /// Per-block gain snapshot, one entry per lane.
    gains: Vec<f32>,
    channels: usize,
    max_length: usize,
    /// Next frame to play, always in `[0, max_length)`.
    position: usize,
}

impl BlockMixer {
    /// Creates a mixer positioned at frame 0.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` if the store is not sealed or holds no stems.
    pub fn new(store: &StemStore) -> Result<Self, MixError> {
        let max_length = store
            .max_length()
            .ok_or(MixError::NotReady("stem store is not sealed"))?;
        if store.is_empty() || max_length == 0 {
            return Err(MixError::NotReady("stem store has no audio"));
        }

        let lanes: Vec<Lane> = store
            .stems()
            .iter()
            .map(|stem| Lane {
                samples: stem.shared_samples(),
                control: stem.control(),
            })
            .collect();

        Ok(Self {
            gains: vec![0.0; lanes.len()],
            lanes,
            channels: store.channels() as usize,
            max_length,
            position: 0,
        })
    }

    /// Frame index the next block starts at.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Common stem length in frames.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Interleaved channel count of the output.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Renders one interleaved block into `out`.
    ///
    /// The block holds `out.len() / channels` frames. Frames past the end of
    /// the stems are zero-filled and the next block starts again at frame 0;
    /// a block never splices the end of the loop onto its start.
    pub fn render(&mut self, out: &mut [f32]) {
        let frames = out.len() / self.channels;

        // Each stem's volume/mute is read once per block.
        for (gain, lane) in self.gains.iter_mut().zip(&self.lanes) {
            *gain = lane.control.snapshot().gain();
        }

        let end = (self.position + frames).min(self.max_length);
        let produced = (end - self.position) * self.channels;
        let base = self.position * self.channels;

        let (mixed, rest) = out.split_at_mut(produced);
        for (offset, slot) in mixed.iter_mut().enumerate() {
            let index = base + offset;
            let mut acc = 0.0f64;
            for (lane, &gain) in self.lanes.iter().zip(&self.gains) {
                if gain != 0.0 {
                    acc += f64::from(lane.samples[index]) * f64::from(gain);
                }
            }
            *slot = saturate(acc);
        }
        rest.fill(0.0);

        self.position = if end == self.max_length { 0 } else { end };
    }
}

/// Clamps a summed sample into the output range instead of wrapping.
#[inline]
fn saturate(sample: f64) -> f32 {
    sample.clamp(-1.0, 1.0) as f32
}
