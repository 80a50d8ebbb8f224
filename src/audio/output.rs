//! Audio output backends.
//!
//! An output accepts one render callback and calls it periodically with a
//! block to fill. The returned stream guard keeps the registration alive;
//! dropping it deregisters the callback.

use crate::error::MixError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use std::sync::{Arc, Mutex};

/// Callback that fills one interleaved output block.
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Callback invoked when the output device fails during playback.
pub type FaultFn = Box<dyn FnMut(String) + Send + 'static>;

/// Sample rate and channel layout of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

/// A destination for rendered audio.
pub trait AudioOutput {
    /// Guard that keeps the callback registered while alive.
    type Stream;

    /// Registers `render` and starts calling it.
    ///
    /// `on_fault` is called from the output's own thread if the device
    /// fails after the stream started.
    fn open(
        &mut self,
        format: StreamFormat,
        render: RenderFn,
        on_fault: FaultFn,
    ) -> Result<Self::Stream, MixError>;
}

/// Output through a cpal device.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    /// Device name to open; the host default when `None`.
    pub device: Option<String>,
    /// Fixed block size in frames; the device default when `None`.
    pub buffer_frames: Option<u32>,
}

/// Keeps a cpal stream alive. Drop to stop audio.
pub struct CpalStream {
    _stream: Stream,
}

impl CpalOutput {
    /// Creates an output for the given device and block size.
    pub fn new(device: Option<String>, buffer_frames: Option<u32>) -> Self {
        Self {
            device,
            buffer_frames,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, MixError> {
        let host = cpal::default_host();
        match &self.device {
            Some(name) => host
                .output_devices()
                .map_err(|e| MixError::Output(e.to_string()))?
                .find(|d| d.name().ok().as_ref() == Some(name))
                .ok_or_else(|| MixError::Output(format!("Audio device not found: {}", name))),
            None => host
                .default_output_device()
                .ok_or_else(|| MixError::Output("No default output device".to_string())),
        }
    }
}

impl AudioOutput for CpalOutput {
    type Stream = CpalStream;

    fn open(
        &mut self,
        format: StreamFormat,
        mut render: RenderFn,
        mut on_fault: FaultFn,
    ) -> Result<CpalStream, MixError> {
        let device = self.find_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: match self.buffer_frames {
                Some(frames) => BufferSize::Fixed(frames),
                None => BufferSize::Default,
            },
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data),
                move |err| on_fault(err.to_string()),
                None,
            )
            .map_err(|e| MixError::Output(format!("Failed to build audio stream: {}", e)))?;
        stream
            .play()
            .map_err(|e| MixError::Output(format!("Failed to start audio stream: {}", e)))?;

        tracing::info!(
            "Audio stream started on {}: {} channels, {}Hz",
            device_name,
            format.channels,
            format.sample_rate
        );

        Ok(CpalStream { _stream: stream })
    }
}

struct Registration {
    format: StreamFormat,
    render: RenderFn,
    on_fault: FaultFn,
}

type Slot = Arc<Mutex<Option<Registration>>>;

/// An output driven by its host instead of a device.
///
/// The host calls [`ManualOutput::pull`] whenever it wants a block. Useful
/// for embedding the mixer in another audio graph and for tests.
#[derive(Clone, Default)]
pub struct ManualOutput {
    slot: Slot,
}

/// Registration guard for [`ManualOutput`].
pub struct ManualStream {
    slot: Slot,
}

impl ManualOutput {
    /// Creates an output with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills `out` through the registered callback.
    ///
    /// Returns false (leaving `out` untouched) when no callback is
    /// registered.
    pub fn pull(&self, out: &mut [f32]) -> bool {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(registration) = slot.as_mut() {
                (registration.render)(out);
                return true;
            }
        }
        false
    }

    /// Reports a device failure to the registered stream.
    pub fn fault(&self, reason: impl Into<String>) -> bool {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(registration) = slot.as_mut() {
                (registration.on_fault)(reason.into());
                return true;
            }
        }
        false
    }

    /// Returns whether a callback is currently registered.
    pub fn is_registered(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Format of the registered stream.
    pub fn format(&self) -> Option<StreamFormat> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|r| r.format))
    }
}

impl AudioOutput for ManualOutput {
    type Stream = ManualStream;

    fn open(
        &mut self,
        format: StreamFormat,
        render: RenderFn,
        on_fault: FaultFn,
    ) -> Result<ManualStream, MixError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| MixError::Output("Manual output lock poisoned".to_string()))?;
        if slot.is_some() {
            return Err(MixError::Output("Manual output already in use".to_string()));
        }
        *slot = Some(Registration {
            format,
            render,
            on_fault,
        });
        Ok(ManualStream {
            slot: Arc::clone(&self.slot),
        })
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        // Waits for an in-flight pull to finish, then deregisters.
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}
