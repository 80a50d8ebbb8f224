//! Lock-free per-stem gain state.
//!
//! Volume and mute live in a single `AtomicU64` so the audio thread reads
//! both with one load. The upper 32 bits hold the volume's `f32` bit pattern,
//! bit 0 holds the mute flag.

use std::sync::atomic::{AtomicU64, Ordering};

const MUTE_BIT: u64 = 1;

/// A consistent view of a stem's volume and mute flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainSnapshot {
    /// Volume in [0.0, 1.0].
    pub volume: f32,
    /// Whether the stem is muted.
    pub muted: bool,
}

impl GainSnapshot {
    /// The multiplier applied to the stem's samples.
    #[inline]
    pub fn gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }
}

/// Live control state shared between controllers and the audio thread.
#[derive(Debug)]
pub struct StemControl {
    state: AtomicU64,
}

impl StemControl {
    /// Creates control state with the given initial volume and mute flag.
    pub fn new(volume: f32, muted: bool) -> Self {
        Self {
            state: AtomicU64::new(pack(clamp_volume(volume), muted)),
        }
    }

    /// Sets the volume, clamped to [0.0, 1.0]. The mute flag is preserved.
    pub fn set_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(pack(volume, bits & MUTE_BIT != 0))
            })
            .ok();
    }

    /// Sets the mute flag. The volume is preserved.
    pub fn set_muted(&self, muted: bool) {
        if muted {
            self.state.fetch_or(MUTE_BIT, Ordering::AcqRel);
        } else {
            self.state.fetch_and(!MUTE_BIT, Ordering::AcqRel);
        }
    }

    /// Reads volume and mute together.
    #[inline]
    pub fn snapshot(&self) -> GainSnapshot {
        unpack(self.state.load(Ordering::Acquire))
    }
}

impl Default for StemControl {
    fn default() -> Self {
        Self::new(1.0, false)
    }
}

/// Clamps a requested volume into [0.0, 1.0]. NaN maps to silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[inline]
fn pack(volume: f32, muted: bool) -> u64 {
    (u64::from(volume.to_bits()) << 32) | u64::from(muted)
}

#[inline]
fn unpack(bits: u64) -> GainSnapshot {
    GainSnapshot {
        volume: f32::from_bits((bits >> 32) as u32),
        muted: bits & MUTE_BIT != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let control = StemControl::default();
        let snap = control.snapshot();
        assert_eq!(snap.volume, 1.0);
        assert!(!snap.muted);
        assert_eq!(snap.gain(), 1.0);
    }

    #[test]
    fn test_volume_and_mute_are_independent() {
        let control = StemControl::default();
        control.set_volume(0.25);
        control.set_muted(true);
        assert_eq!(
            control.snapshot(),
            GainSnapshot {
                volume: 0.25,
                muted: true
            }
        );
        assert_eq!(control.snapshot().gain(), 0.0);

        control.set_volume(0.75);
        assert!(control.snapshot().muted);

        control.set_muted(false);
        assert_eq!(control.snapshot().gain(), 0.75);
    }

    #[test]
    fn test_volume_is_clamped() {
        let control = StemControl::default();
        control.set_volume(3.0);
        assert_eq!(control.snapshot().volume, 1.0);
        control.set_volume(-0.5);
        assert_eq!(control.snapshot().volume, 0.0);
        control.set_volume(f32::NAN);
        assert_eq!(control.snapshot().volume, 0.0);
    }

    #[test]
    fn test_concurrent_writers() {
        use std::sync::Arc;
        use std::thread;

        let control = Arc::new(StemControl::default());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let control = Arc::clone(&control);
                thread::spawn(move || {
                    for n in 0..1000 {
                        if i % 2 == 0 {
                            control.set_volume((n % 10) as f32 / 10.0);
                        } else {
                            control.set_muted(n % 2 == 0);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = control.snapshot();
        assert!((0.0..=1.0).contains(&snap.volume));
    }

    #[test]
    fn test_volume_writes_keep_mute_bit() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        const WRITES: usize = 20_000;
        let written = |n: usize| (n % 97) as f32 / 96.0;

        for _ in 0..20 {
            let control = Arc::new(StemControl::new(0.5, false));
            let barrier = Arc::new(Barrier::new(2));

            let volume_writer = {
                let control = Arc::clone(&control);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for n in 0..WRITES {
                        control.set_volume(written(n));
                    }
                })
            };
            let mute_writer = {
                let control = Arc::clone(&control);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    control.set_muted(true);
                })
            };
            volume_writer.join().unwrap();
            mute_writer.join().unwrap();

            let snap = control.snapshot();
            assert!(snap.muted, "mute flag lost to a concurrent volume write");
            assert_eq!(snap.volume, written(WRITES - 1));
        }
    }
}
