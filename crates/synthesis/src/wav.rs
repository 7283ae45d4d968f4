use std::io::Cursor;

use base64::Engine as _;
use dubsync_segment::AudioClip;

use crate::{Result, ServiceError};

/// Decode an audio payload string: hex first, base64 as fallback.
pub fn decode_audio_payload(payload: &str) -> Result<Vec<u8>> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(ServiceError::exhausted("empty audio payload"));
    }
    if let Some(bytes) = decode_hex(payload) {
        return Ok(bytes);
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ServiceError::exhausted(format!("audio payload is neither hex nor base64: {e}")))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    fn nibble(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| Some(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}

/// Decode WAV bytes into a mono clip, averaging channels.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| ServiceError::exhausted(format!("invalid wav: {e}")))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ServiceError::exhausted(format!("invalid wav samples: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| ServiceError::exhausted(format!("invalid wav samples: {e}")))?
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(AudioClip::new(spec.sample_rate, mono))
}

/// Encode a clip as 16-bit PCM mono WAV.
pub fn encode_wav(clip: &AudioClip) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ServiceError::exhausted(e.to_string()))?;
        for sample in clip.samples.iter() {
            let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| ServiceError::exhausted(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| ServiceError::exhausted(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_hex_payload() {
        assert_eq!(decode_audio_payload("00ff10").unwrap(), vec![0x00, 0xff, 0x10]);
        assert_eq!(decode_audio_payload("ABcd").unwrap(), vec![0xab, 0xcd]);
    }

    #[test]
    fn test_base64_fallback() {
        // "hello" in base64; not valid hex because of odd length and letters
        assert_eq!(decode_audio_payload("aGVsbG8=").unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_empty_payload() {
        assert!(decode_audio_payload("  ").is_err());
    }

    #[test]
    fn test_wav_through_hex() {
        let clip = AudioClip::new(8000, vec![0.5; 800]);
        let bytes = encode_wav(&clip).unwrap();
        let decoded = decode_wav(&decode_audio_payload(&to_hex(&bytes)).unwrap()).unwrap();

        assert_eq!(decoded.sample_rate, 8000);
        assert_eq!(decoded.samples.len(), 800);
        assert!((decoded.samples[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_stereo_is_averaged() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..10 {
                writer.write_sample(i16::MAX).unwrap();
                writer.write_sample(0_i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        let clip = decode_wav(&cursor.into_inner()).unwrap();
        assert_eq!(clip.samples.len(), 10);
        assert!((clip.samples[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_garbage_is_exhausted() {
        let err = decode_wav(b"not a wav").unwrap_err();
        assert!(!err.is_retryable());
    }
}
