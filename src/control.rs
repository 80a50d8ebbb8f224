//! Hand-height control: turns tracker output into stem volumes.
//!
//! A tracker (running elsewhere) produces one frame of hand heights per video
//! frame. Heights arrive over a channel; the conductor keeps only the newest
//! frame and applies it to the mix at a fixed control rate.

use crate::audio::MixControl;
use crossbeam_channel::{Receiver, TryRecvError};
use std::num::ParseFloatError;
use std::time::Duration;

/// Default control rate in updates per second.
pub const DEFAULT_CONTROL_RATE_HZ: f32 = 10.0;

/// Heights of the detected hands, one per stem, in [0.0, 1.0].
pub type HandHeights = Vec<f32>;

/// Maps hand heights onto stem volumes.
///
/// Stem `i` follows `heights[i]`. Stems without a matching hand are turned
/// down to 0, so no hands means silence. Extra heights are ignored.
pub fn apply_hand_heights(control: &MixControl, heights: &[f32]) {
    for index in 0..control.len() {
        let volume = heights.get(index).copied().unwrap_or(0.0);
        control.set_volume_at(index, volume).ok();
    }
}

/// Parses a line of heights separated by whitespace or commas.
///
/// An empty line means no hands were detected.
pub fn parse_heights(line: &str) -> Result<HandHeights, ParseFloatError> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .map(str::parse::<f32>)
        .collect()
}

/// Applies the latest hand heights to the mix at a fixed rate.
///
/// Until the first frame arrives the mix keeps its starting volumes.
pub struct Conductor {
    control: MixControl,
    frames: Receiver<HandHeights>,
    period: Duration,
    latest: Option<HandHeights>,
}

impl Conductor {
    /// Creates a conductor ticking `rate_hz` times per second.
    ///
    /// Non-positive rates fall back to the default rate.
    pub fn new(control: MixControl, frames: Receiver<HandHeights>, rate_hz: f32) -> Self {
        let rate = if rate_hz.is_finite() && rate_hz > 0.0 {
            rate_hz
        } else {
            DEFAULT_CONTROL_RATE_HZ
        };
        Self {
            control,
            frames,
            period: Duration::from_secs_f32(1.0 / rate),
            latest: None,
        }
    }

    /// Time between ticks.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Heights applied on the last tick, if any frame has arrived.
    pub fn latest(&self) -> Option<&[f32]> {
        self.latest.as_deref()
    }

    /// Drains pending frames, keeps the newest, applies it.
    ///
    /// # Returns
    ///
    /// false once the sender side is gone and nothing is left to apply.
    pub fn step(&mut self) -> bool {
        let mut connected = true;
        loop {
            match self.frames.try_recv() {
                Ok(frame) => self.latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    connected = false;
                    break;
                }
            }
        }
        if let Some(heights) = &self.latest {
            apply_hand_heights(&self.control, heights);
        }
        connected
    }

    /// Ticks until the sender disconnects.
    pub fn run(mut self) {
        tracing::info!(
            "Conductor running at {:.1} Hz over {} stems",
            1.0 / self.period.as_secs_f32(),
            self.control.len()
        );
        while self.step() {
            std::thread::sleep(self.period);
        }
        tracing::info!("Hand-height feed closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ManualOutput, MixEngine};
    use crate::stems::{DecodedAudio, StemStore};

    fn control(stems: usize) -> (MixEngine<ManualOutput>, MixControl) {
        let mut store = StemStore::new(2);
        for i in 0..stems {
            store
                .load(format!("stem{}", i), DecodedAudio::new(1, 44100, vec![0.1; 8]))
                .unwrap();
        }
        store.seal().unwrap();
        let engine = MixEngine::new(store, ManualOutput::new());
        let control = engine.control();
        (engine, control)
    }

    fn volumes(control: &MixControl) -> Vec<f32> {
        control
            .stem_ids()
            .map(|id| control.gain(id.as_str()).unwrap().volume)
            .collect()
    }

    #[test]
    fn test_no_hands_silences_everything() {
        let (_engine, control) = control(3);
        apply_hand_heights(&control, &[]);
        assert_eq!(volumes(&control), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_heights_map_by_index() {
        let (_engine, control) = control(4);
        apply_hand_heights(&control, &[0.3, 0.9]);
        assert_eq!(volumes(&control), vec![0.3, 0.9, 0.0, 0.0]);

        // Extra hands are ignored, out-of-range heights are clamped.
        apply_hand_heights(&control, &[0.1, 0.2, 0.4, 1.5, 0.7]);
        assert_eq!(volumes(&control), vec![0.1, 0.2, 0.4, 1.0]);
    }

    #[test]
    fn test_parse_heights() {
        assert_eq!(parse_heights("0.25 0.5").unwrap(), vec![0.25, 0.5]);
        assert_eq!(parse_heights(" 0.1,0.2 , 0.3 ").unwrap(), vec![0.1, 0.2, 0.3]);
        assert!(parse_heights("").unwrap().is_empty());
        assert!(parse_heights("high low").is_err());
    }

    #[test]
    fn test_conductor_keeps_latest_frame() {
        let (_engine, control) = control(2);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut conductor = Conductor::new(control.clone(), rx, 20.0);
        assert!((conductor.period().as_secs_f64() - 0.05).abs() < 1e-6);

        // Before any frame arrives, nothing is applied.
        assert!(conductor.step());
        assert_eq!(conductor.latest(), None);
        assert_eq!(volumes(&control), vec![1.0, 1.0]);

        tx.send(vec![0.2, 0.2]).unwrap();
        tx.send(vec![0.8, 0.6]).unwrap();
        assert!(conductor.step());
        assert_eq!(conductor.latest(), Some(&[0.8, 0.6][..]));
        assert_eq!(volumes(&control), vec![0.8, 0.6]);

        // Without new frames the last one stays in effect.
        control.set_volume_at(0, 0.0).unwrap();
        assert!(conductor.step());
        assert_eq!(volumes(&control), vec![0.8, 0.6]);

        tx.send(vec![0.5]).unwrap();
        drop(tx);
        assert!(!conductor.step());
        assert_eq!(volumes(&control), vec![0.5, 0.0]);
    }

    #[test]
    fn test_starting_volume_survives_until_first_frame() {
        let (_engine, control) = control(2);
        control.set_volume("stem0", 0.8).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut conductor = Conductor::new(control.clone(), rx, 10.0);

        assert!(conductor.step());
        assert_eq!(volumes(&control), vec![0.8, 1.0]);

        // An explicit empty frame still means no hands.
        tx.send(Vec::new()).unwrap();
        assert!(conductor.step());
        assert_eq!(volumes(&control), vec![0.0, 0.0]);
    }

    #[test]
    fn test_conductor_run_ends_on_disconnect() {
        let (_engine, control) = control(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let conductor = Conductor::new(control.clone(), rx, 1000.0);
        let handle = std::thread::spawn(move || conductor.run());

        tx.send(vec![0.4]).unwrap();
        drop(tx);
        handle.join().unwrap();
        assert_eq!(volumes(&control), vec![0.4]);
    }

    #[test]
    fn test_invalid_rate_uses_default() {
        let (_engine, control) = control(1);
        let (_tx, rx) = crossbeam_channel::unbounded();
        let conductor = Conductor::new(control, rx, 0.0);
        assert!((conductor.period().as_secs_f64() - 0.1).abs() < 1e-6);
    }
}
