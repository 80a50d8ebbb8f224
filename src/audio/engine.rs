//! Mix engine: playback lifecycle and the control surface.
//!
//! The engine hands a fresh `BlockMixer` to the audio output on every
//! `play()` and drops the output stream on `stop()`. Controllers change
//! per-stem volume and mute through a cloneable [`MixControl`], which only
//! touches atomics and is safe to use from any thread.

use super::mixer::BlockMixer;
use super::output::{AudioOutput, CpalOutput, FaultFn, RenderFn, StreamFormat};
use crate::error::MixError;
use crate::stems::{GainSnapshot, StemControl, StemId, StemStore};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Represents the current playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Not playing; the next `play()` starts at frame 0.
    Stopped,
    /// The render callback is registered with the output.
    Playing,
}

/// Asynchronous notifications from the audio side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The output device failed; playback has stopped.
    DeviceFault(String),
}

/// Thread-safe handle for changing stem volume and mute during playback.
#[derive(Debug, Clone)]
pub struct MixControl {
    stems: Arc<[(StemId, Arc<StemControl>)]>,
}

impl MixControl {
    fn new(store: &StemStore) -> Self {
        Self {
            stems: store
                .stems()
                .iter()
                .map(|stem| (stem.id().clone(), stem.control()))
                .collect(),
        }
    }

    /// Sets a stem's volume, clamped to [0.0, 1.0].
    pub fn set_volume(&self, id: &str, volume: f32) -> Result<(), MixError> {
        self.lookup(id)?.set_volume(volume);
        Ok(())
    }

    /// Mutes or unmutes a stem.
    pub fn set_mute(&self, id: &str, muted: bool) -> Result<(), MixError> {
        self.lookup(id)?.set_muted(muted);
        Ok(())
    }

    /// Sets the volume of the stem at `index` in load order.
    pub fn set_volume_at(&self, index: usize, volume: f32) -> Result<(), MixError> {
        self.at(index)?.set_volume(volume);
        Ok(())
    }

    /// Mutes or unmutes the stem at `index` in load order.
    pub fn set_mute_at(&self, index: usize, muted: bool) -> Result<(), MixError> {
        self.at(index)?.set_muted(muted);
        Ok(())
    }

    /// Current volume and mute flag of a stem.
    pub fn gain(&self, id: &str) -> Result<GainSnapshot, MixError> {
        Ok(self.lookup(id)?.snapshot())
    }

    /// Stem ids in load order.
    pub fn stem_ids(&self) -> impl Iterator<Item = &StemId> + '_ {
        self.stems.iter().map(|(id, _)| id)
    }

    /// Number of controllable stems.
    pub fn len(&self) -> usize {
        self.stems.len()
    }

    /// Returns true if there are no stems.
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    fn lookup(&self, id: &str) -> Result<&StemControl, MixError> {
        self.stems
            .iter()
            .find(|(stem_id, _)| stem_id.as_str() == id)
            .map(|(_, control)| control.as_ref())
            .ok_or_else(|| MixError::UnknownStem(id.to_string()))
    }

    fn at(&self, index: usize) -> Result<&StemControl, MixError> {
        self.stems
            .get(index)
            .map(|(_, control)| control.as_ref())
            .ok_or_else(|| MixError::UnknownStem(format!("#{}", index)))
    }
}

/// The stem mixer and its playback lifecycle.
///
/// Generic over the audio output so hosts and tests can drive rendering
/// themselves; [`CpalOutput`] is the default.
pub struct MixEngine<O: AudioOutput = CpalOutput> {
    store: StemStore,
    control: MixControl,
    output: O,
    /// Present while the render callback is registered.
    stream: Option<O::Stream>,
    /// Set from the output's error callback.
    faulted: Arc<AtomicBool>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
}

impl MixEngine<CpalOutput> {
    /// Creates an engine that plays through the default cpal device.
    pub fn with_default_output(store: StemStore) -> Self {
        Self::new(store, CpalOutput::default())
    }
}

impl<O: AudioOutput> MixEngine<O> {
    /// Creates a stopped engine over `store`.
    ///
    /// The store should be sealed; `play()` fails with `NotReady` otherwise.
    pub fn new(store: StemStore, output: O) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            control: MixControl::new(&store),
            store,
            output,
            stream: None,
            faulted: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx,
        }
    }

    /// The stems being mixed.
    pub fn store(&self) -> &StemStore {
        &self.store
    }

    /// A control handle that can be moved to other threads.
    pub fn control(&self) -> MixControl {
        self.control.clone()
    }

    /// Receiver for asynchronous engine events.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events_rx.clone()
    }

    /// Common stem length in frames, once the store is sealed.
    pub fn max_length(&self) -> Option<usize> {
        self.store.max_length()
    }

    /// Sets a stem's volume, clamped to [0.0, 1.0].
    pub fn set_volume(&self, id: &str, volume: f32) -> Result<(), MixError> {
        self.control.set_volume(id, volume)
    }

    /// Mutes or unmutes a stem.
    pub fn set_mute(&self, id: &str, muted: bool) -> Result<(), MixError> {
        self.control.set_mute(id, muted)
    }

    /// Returns the current playback state.
    ///
    /// A stream whose device faulted reports `Stopped`.
    pub fn state(&self) -> PlaybackState {
        if self.stream.is_some() && !self.faulted.load(Ordering::Acquire) {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        }
    }

    /// Returns whether audio is currently playing.
    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Starts playback from frame 0.
    ///
    /// Does nothing if already playing.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The store is not sealed or has no stems (`NotReady`)
    /// - The audio output cannot be opened (`Output`)
    pub fn play(&mut self) -> Result<(), MixError> {
        self.release_faulted_stream();
        if self.stream.is_some() {
            tracing::debug!("play() ignored: already playing");
            return Ok(());
        }

        let mut mixer = BlockMixer::new(&self.store)?;
        let sample_rate = self
            .store
            .sample_rate()
            .ok_or(MixError::NotReady("stem store has no sample rate"))?;
        let format = StreamFormat {
            sample_rate,
            channels: self.store.channels(),
        };

        let faulted = Arc::new(AtomicBool::new(false));
        self.faulted = Arc::clone(&faulted);

        let render_faulted = Arc::clone(&faulted);
        let render: RenderFn = Box::new(move |out: &mut [f32]| {
            if render_faulted.load(Ordering::Acquire) {
                out.fill(0.0);
            } else {
                mixer.render(out);
            }
        });

        let events = self.events_tx.clone();
        let on_fault: FaultFn = Box::new(move |reason: String| {
            if !faulted.swap(true, Ordering::AcqRel) {
                tracing::error!("Audio device fault: {}", reason);
                let _ = events.send(EngineEvent::DeviceFault(reason));
            }
        });

        let stream = self.output.open(format, render, on_fault)?;
        self.stream = Some(stream);
        tracing::info!(
            "Playing {} stems ({} frames at {}Hz)",
            self.store.len(),
            self.store.max_length().unwrap_or(0),
            sample_rate
        );
        Ok(())
    }

    /// Stops playback and rewinds to frame 0.
    ///
    /// Once this returns no new render call starts. Does nothing if
    /// already stopped.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("Playback stopped");
        }
        self.faulted.store(false, Ordering::Release);
    }

    /// Drops a stream whose device reported a fault.
    fn release_faulted_stream(&mut self) {
        if self.stream.is_some() && self.faulted.load(Ordering::Acquire) {
            self.stream = None;
            tracing::warn!("Released audio stream after device fault");
        }
    }
}

impl<O: AudioOutput> Drop for MixEngine<O> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::ManualOutput;
    use crate::stems::DecodedAudio;

    const RATE: u32 = 44100;

    fn sealed_store(stems: &[(&str, f32)], frames: usize) -> StemStore {
        let mut store = StemStore::new(2);
        for (id, value) in stems {
            store
                .load(*id, DecodedAudio::new(1, RATE, vec![*value; frames]))
                .unwrap();
        }
        store.seal().unwrap();
        store
    }

    fn engine(stems: &[(&str, f32)], frames: usize) -> (MixEngine<ManualOutput>, ManualOutput) {
        let output = ManualOutput::new();
        let engine = MixEngine::new(sealed_store(stems, frames), output.clone());
        (engine, output)
    }

    #[test]
    fn test_play_registers_stream() {
        let (mut engine, output) = engine(&[("a", 0.4), ("b", -0.2)], RATE as usize);
        assert_eq!(engine.state(), PlaybackState::Stopped);

        engine.play().unwrap();
        assert!(engine.is_playing());
        assert_eq!(
            output.format(),
            Some(StreamFormat {
                sample_rate: RATE,
                channels: 2
            })
        );

        let mut buf = vec![0.0; 512];
        assert!(output.pull(&mut buf));
        assert!(buf.iter().all(|s| (*s - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_play_unsealed_not_ready() {
        let mut store = StemStore::new(2);
        store
            .load("a", DecodedAudio::new(1, RATE, vec![0.1; 8]))
            .unwrap();
        let output = ManualOutput::new();
        let mut engine = MixEngine::new(store, output.clone());

        assert!(matches!(engine.play(), Err(MixError::NotReady(_))));
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert!(!output.is_registered());
    }

    #[test]
    fn test_play_empty_not_ready() {
        let mut engine = MixEngine::new(StemStore::new(2), ManualOutput::new());
        assert!(matches!(engine.play(), Err(MixError::NotReady(_))));
    }

    #[test]
    fn test_stop_deregisters() {
        let (mut engine, output) = engine(&[("a", 0.5)], 64);
        engine.play().unwrap();
        engine.stop();
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert!(!output.is_registered());

        let mut buf = [3.0f32; 4];
        assert!(!output.pull(&mut buf));
        assert_eq!(buf, [3.0; 4]);
    }

    fn ramp_engine() -> (MixEngine<ManualOutput>, ManualOutput) {
        let samples: Vec<f32> = (0..16).map(|i| i as f32 / 32.0).collect();
        let mut store = StemStore::new(2);
        store
            .load("ramp", DecodedAudio::new(1, RATE, samples))
            .unwrap();
        store.seal().unwrap();
        let output = ManualOutput::new();
        (MixEngine::new(store, output.clone()), output)
    }

    #[test]
    fn test_play_and_stop_are_idempotent() {
        let (mut engine, output) = ramp_engine();

        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), PlaybackState::Stopped);

        engine.play().unwrap();
        let mut buf = vec![0.0; 8]; // 4 frames
        output.pull(&mut buf);

        // A second play() neither restarts the stream nor rewinds.
        engine.play().unwrap();
        assert!(engine.is_playing());
        output.pull(&mut buf);
        assert_eq!(buf[0], 4.0 / 32.0);

        engine.stop();
        engine.stop();
        assert!(!output.is_registered());
    }

    #[test]
    fn test_restart_rewinds_to_start() {
        let (mut engine, output) = ramp_engine();

        engine.play().unwrap();
        let mut first = vec![0.0; 8];
        output.pull(&mut first);
        output.pull(&mut first);
        assert_eq!(first[0], 4.0 / 32.0);

        engine.stop();
        engine.play().unwrap();
        let mut again = vec![0.0; 8];
        output.pull(&mut again);
        assert_eq!(again[0], 0.0);
        assert_eq!(again[2], 1.0 / 32.0);
    }

    #[test]
    fn test_volume_applies_on_next_block() {
        let (mut engine, output) = engine(&[("a", 0.6), ("b", 0.0)], 1000);
        engine.play().unwrap();

        let mut before = vec![0.0; 64];
        output.pull(&mut before);
        engine.set_volume("a", 0.5).unwrap();
        let mut after = vec![0.0; 64];
        output.pull(&mut after);

        assert!(before.iter().all(|s| (*s - 0.6).abs() < 1e-6));
        assert!(after.iter().all(|s| (*s - 0.3).abs() < 1e-6));
    }

    #[test]
    fn test_control_from_another_thread() {
        let (mut engine, output) = engine(&[("a", 0.4), ("b", -0.2)], 1000);
        engine.play().unwrap();

        let control = engine.control();
        std::thread::spawn(move || {
            control.set_mute("b", true).unwrap();
            control.set_volume_at(0, 0.5).unwrap();
        })
        .join()
        .unwrap();

        let mut buf = vec![0.0; 32];
        output.pull(&mut buf);
        assert!(buf.iter().all(|s| (*s - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_unknown_stem() {
        let (engine, _output) = engine(&[("a", 0.4)], 16);
        assert!(matches!(
            engine.set_volume("zzz", 0.1),
            Err(MixError::UnknownStem(_))
        ));
        assert!(matches!(
            engine.control().set_mute_at(3, true),
            Err(MixError::UnknownStem(_))
        ));
        // The existing stem is unaffected.
        assert_eq!(engine.control().gain("a").unwrap().volume, 1.0);
    }

    #[test]
    fn test_device_fault_stops_playback() {
        let (mut engine, output) = engine(&[("a", 0.4)], 256);
        let events = engine.events();
        engine.play().unwrap();

        assert!(output.fault("device unplugged"));
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::DeviceFault("device unplugged".to_string())
        );

        // The faulted stream renders silence until released.
        let mut buf = vec![1.0; 8];
        output.pull(&mut buf);
        assert!(buf.iter().all(|s| *s == 0.0));

        // No automatic retry; the caller restarts explicitly.
        engine.play().unwrap();
        assert!(engine.is_playing());
        output.pull(&mut buf);
        assert!(buf.iter().all(|s| (*s - 0.4).abs() < 1e-6));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_drop_stops_stream() {
        let (mut engine, output) = engine(&[("a", 0.4)], 16);
        engine.play().unwrap();
        drop(engine);
        assert!(!output.is_registered());
    }
}
