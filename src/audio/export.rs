//! Offline mixdown to WAV.
//!
//! Runs the same block mixer used for live playback over the whole loop and
//! writes the result to a WAV file, using the stems' current volume and mute
//! settings.

use super::mixer::BlockMixer;
use crate::stems::StemStore;
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

/// Block size for rendering, in frames.
const RENDER_BLOCK_FRAMES: usize = 4096;

/// Exports `passes` loops of a sealed store to a 16-bit WAV file.
///
/// Blocks are cut at the loop point so consecutive passes join without the
/// silence padding a live stream would insert.
///
/// # Arguments
///
/// * `store` - The sealed stem store
/// * `output_path` - Path for the output WAV file
/// * `passes` - Number of times to play the loop (at least 1)
/// * `progress_callback` - Optional callback for progress updates (0.0 to 1.0)
///
/// # Errors
///
/// Returns error if:
/// - The store is not sealed or empty
/// - Output file cannot be created or written
pub fn export_mix_to_wav<P, F>(
    store: &StemStore,
    output_path: P,
    passes: u32,
    mut progress_callback: Option<F>,
) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(f32),
{
    let mut mixer = BlockMixer::new(store).context("Cannot export an unsealed mix")?;
    let sample_rate = store
        .sample_rate()
        .context("Stem store has no sample rate")?;
    let channels = mixer.channels();

    let spec = WavSpec {
        channels: store.channels(),
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let total_frames = export_frames(mixer.max_length(), passes)?;

    let mut writer = WavWriter::create(output_path.as_ref(), spec).with_context(|| {
        format!(
            "Failed to create output WAV file: {}",
            output_path.as_ref().display()
        )
    })?;

    let mut buffer = vec![0.0f32; RENDER_BLOCK_FRAMES * channels];
    let mut written = 0usize;

    tracing::info!(
        "Exporting {} frames to {}",
        total_frames,
        output_path.as_ref().display()
    );

    while written < total_frames {
        // Never let a block cross the loop point.
        let until_loop = mixer.max_length() - mixer.position();
        let frames = RENDER_BLOCK_FRAMES.min(until_loop);
        let block = &mut buffer[..frames * channels];
        mixer.render(block);

        for sample in block.iter() {
            writer.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)?;
        }

        written += frames;
        if let Some(ref mut callback) = progress_callback {
            callback(written as f32 / total_frames as f32);
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;

    Ok(())
}

/// Total frames written for `passes` loops of `max_length` frames.
fn export_frames(max_length: usize, passes: u32) -> Result<usize> {
    let passes = usize::try_from(passes.max(1)).context("Pass count does not fit in memory")?;
    max_length
        .checked_mul(passes)
        .with_context(|| format!("Export of {} passes is too long", passes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stems::DecodedAudio;
    use hound::WavReader;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("stemmix-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_export_two_passes() {
        let mut store = StemStore::new(2);
        let samples: Vec<f32> = (0..5000).map(|i| ((i % 100) as f32 - 50.0) / 100.0).collect();
        store
            .load("a", DecodedAudio::new(1, 22050, samples))
            .unwrap();
        store
            .load("b", DecodedAudio::new(1, 22050, vec![0.1; 6000]))
            .unwrap();
        store.seal().unwrap();
        store.set_mute("b", true).unwrap();

        let path = temp_path("two-passes.wav");
        let mut last_progress = 0.0;
        export_mix_to_wav(&store, &path, 2, Some(|p: f32| last_progress = p)).unwrap();
        assert_eq!(last_progress, 1.0);

        let mut reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 22050);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 5000 * 2 * 2);

        // Second pass repeats the first with no padding at the seam.
        let (first, second) = samples.split_at(samples.len() / 2);
        assert_eq!(first, second);
        assert_eq!(first[0], (-0.5f32 * 32767.0) as i16);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_export_frames() {
        assert_eq!(export_frames(5000, 2).unwrap(), 10000);
        assert_eq!(export_frames(5000, 0).unwrap(), 5000);
        assert!(export_frames(usize::MAX / 2, 3).is_err());
        assert!(export_frames(usize::MAX, u32::MAX).is_err());
    }

    #[test]
    fn test_export_unsealed_fails() {
        let mut store = StemStore::new(2);
        store
            .load("a", DecodedAudio::new(1, 22050, vec![0.0; 10]))
            .unwrap();
        let path = temp_path("unsealed.wav");
        assert!(export_mix_to_wav(&store, &path, 1, None::<fn(f32)>).is_err());
        assert!(!path.exists());
    }
}
