//! Stem sources and decoding.
//!
//! A stem arrives either as encoded bytes (WAV, FLAC, Vorbis, MP3), decoded
//! through rodio's decoder, or as samples that were already decoded
//! elsewhere.

use crate::error::DecodeError;
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Fully decoded interleaved audio.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    /// Wraps interleaved samples.
    pub fn new(channels: u16, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            channels,
            sample_rate,
            samples,
        }
    }

    /// Number of whole frames.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Checks that the data forms at least one whole frame.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.channels == 0 {
            return Err(DecodeError::ZeroChannels);
        }
        if self.samples.is_empty() {
            return Err(DecodeError::Empty);
        }
        if self.samples.len() % self.channels as usize != 0 {
            return Err(DecodeError::PartialFrame {
                samples: self.samples.len(),
                channels: self.channels,
            });
        }
        Ok(())
    }

    /// Duplicates a mono signal across `channels` channels.
    ///
    /// Returns `self` unchanged when it is not mono or already has the
    /// requested layout.
    pub fn expand_mono(self, channels: u16) -> Self {
        if self.channels != 1 || channels <= 1 {
            return self;
        }
        let width = channels as usize;
        let mut samples = Vec::with_capacity(self.samples.len() * width);
        for sample in &self.samples {
            samples.extend(std::iter::repeat(*sample).take(width));
        }
        Self {
            channels,
            sample_rate: self.sample_rate,
            samples,
        }
    }
}

/// Anything that can be turned into decoded stem audio.
pub trait StemSource {
    /// Decodes the source into interleaved frames.
    fn decode(self) -> Result<DecodedAudio, DecodeError>;
}

impl StemSource for DecodedAudio {
    fn decode(self) -> Result<DecodedAudio, DecodeError> {
        self.validate()?;
        Ok(self)
    }
}

/// An encoded audio byte stream.
pub struct EncodedSource<R> {
    reader: R,
}

impl<R> EncodedSource<R>
where
    R: Read + Seek + Send + Sync + 'static,
{
    /// Wraps a seekable reader of encoded audio.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl EncodedSource<BufReader<File>> {
    /// Opens an encoded audio file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R> StemSource for EncodedSource<R>
where
    R: Read + Seek + Send + Sync + 'static,
{
    fn decode(self) -> Result<DecodedAudio, DecodeError> {
        let decoder =
            Decoder::new(self.reader).map_err(|e| DecodeError::Unrecognized(e.to_string()))?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        // rodio yields 16-bit integer samples
        let samples: Vec<f32> = decoder.map(|s: i16| f32::from(s) / 32768.0).collect();

        let audio = DecodedAudio::new(channels, sample_rate, samples);
        audio.validate()?;
        Ok(audio)
    }
}

/// Builds an in-memory 16-bit WAV file for tests.
#[cfg(test)]
pub(crate) fn wav_bytes(channels: u16, sample_rate: u32, samples: &[f32]) -> Vec<u8> {
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::io::Cursor;

    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for sample in samples {
            writer
                .write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
