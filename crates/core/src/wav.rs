//! WAV encoding and decoding for persisted captures and collaborator payloads.

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;

fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Writes mono 16-bit PCM to `path`, creating parent directories.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer = WavWriter::create(path, mono_spec(sample_rate))
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

/// Encodes mono 16-bit PCM into an in-memory WAV container.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, mono_spec(sample_rate))?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decoded mono clip.
#[derive(Debug, Clone)]
pub struct Clip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Rescales an integer sample of `bits` width to full 16-bit range.
fn scale_to_i16(value: i32, bits: u32) -> i16 {
    let scaled = if bits < 16 {
        value << (16 - bits)
    } else {
        value >> (bits - 16)
    };
    scaled.clamp(-32768, 32767) as i16
}

/// Decodes a WAV container, keeping only the first channel.
pub fn decode_wav(bytes: &[u8]) -> Result<Clip> {
    let reader = WavReader::new(Cursor::new(bytes)).context("Malformed WAV data")?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .context("Failed to read 16-bit samples")?,
        (SampleFormat::Int, bits) if bits <= 32 => {
            let bits = u32::from(bits);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| scale_to_i16(v, bits)))
                .collect::<Result<_, _>>()
                .context("Failed to read integer samples")?
        }
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v * 32768.0).clamp(-32768.0, 32767.0) as i16))
            .collect::<Result<_, _>>()
            .context("Failed to read float samples")?,
        (format, bits) => bail!("Unsupported WAV format {:?} / {} bits", format, bits),
    };

    let samples = if channels > 1 {
        interleaved.iter().step_by(channels).copied().collect()
    } else {
        interleaved
    };

    Ok(Clip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_has_riff_header() {
        let bytes = encode_wav(&[0, 1, -1], 48000).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(bytes.len(), 44 + 6);
    }

    #[test]
    fn test_decode_takes_first_channel() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for (l, r) in [(10i16, -10i16), (20, -20), (30, -30)] {
                writer.write_sample(l).unwrap();
                writer.write_sample(r).unwrap();
            }
            writer.finalize().unwrap();
        }
        let clip = decode_wav(cursor.get_ref()).unwrap();
        assert_eq!(clip.sample_rate, 22050);
        assert_eq!(clip.samples, vec![10, 20, 30]);
    }

    fn encode_with_spec<S: hound::Sample + Copy>(spec: WavSpec, samples: &[S]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_scales_narrow_and_wide_integers() {
        let eight_bit = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        let clip = decode_wav(&encode_with_spec(eight_bit, &[64i8, -128, 127, 0])).unwrap();
        assert_eq!(clip.samples, vec![16384, -32768, 32512, 0]);

        let wide = WavSpec {
            bits_per_sample: 24,
            ..eight_bit
        };
        let clip = decode_wav(&encode_with_spec(wide, &[0x40_0000i32, -0x80_0000])).unwrap();
        assert_eq!(clip.samples, vec![16384, -32768]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(b"definitely not a wav file").is_err());
    }

    #[test]
    fn test_write_wav_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clip.wav");
        write_wav(&path, &[1, 2, 3, 4], 48000).unwrap();

        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 48000);
        assert_eq!(reader.len(), 4);
    }
}
