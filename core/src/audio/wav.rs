//! WAV container parsing and reassembly.
//!
//! Chunks are walked from offset 12 (after `RIFF<size>WAVE`) as
//! `<id:4><size:u32le><body>` records, with a pad byte after odd-sized
//! bodies. A container without a `data` chunk is read with the classic 44-byte
//! header assumption.

use super::{utils::pcm_duration_ms, AudioResult};
use crate::{Result, TtsError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const CANONICAL_HEADER_LEN: usize = 44;
const PCM_FORMAT: u16 = 1;

/// Sample layout of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WavFormat {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl Default for WavFormat {
    /// Mono 16-bit PCM at 22.05 kHz, the layout medium-quality voices produce
    fn default() -> Self {
        Self {
            audio_format: PCM_FORMAT,
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
        }
    }
}

impl WavFormat {
    /// Saturates on nonsensical header values
    pub fn block_align(&self) -> u16 {
        self.channels.saturating_mul(self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(u32::from(self.block_align()))
    }
}

/// Borrowed view of one container
#[derive(Debug, Clone, Copy)]
pub struct ParsedWav<'a> {
    pub format: WavFormat,
    pub data: &'a [u8],
    /// `fmt ` chunk present; otherwise `format` is the default layout
    pub has_format: bool,
    /// Data located by the 44-byte fallback rather than a `data` chunk
    pub header_fallback: bool,
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Locate format and PCM payload; `None` when the buffer is not RIFF
pub fn parse_wav(buf: &[u8]) -> Option<ParsedWav<'_>> {
    if buf.len() < 12 || &buf[0..4] != b"RIFF" {
        return None;
    }

    let mut format = WavFormat::default();
    let mut has_format = false;
    let mut idx = 12usize;

    while idx + 8 <= buf.len() {
        let chunk_id = &buf[idx..idx + 4];
        let size = read_u32(buf, idx + 4) as usize;
        let body = idx + 8;

        if chunk_id == b"fmt " && size >= 16 && body + 16 <= buf.len() {
            format = WavFormat {
                audio_format: read_u16(buf, body),
                channels: read_u16(buf, body + 2),
                sample_rate: read_u32(buf, body + 4),
                bits_per_sample: read_u16(buf, body + 14),
            };
            has_format = true;
        } else if chunk_id == b"data" {
            // streamed writers leave the size at 0 or u32::MAX; clamp to what is there
            let end = body.saturating_add(size).min(buf.len());
            let end = if size == 0 { buf.len() } else { end };
            return Some(ParsedWav {
                format,
                data: &buf[body..end],
                has_format,
                header_fallback: false,
            });
        }

        let Some(next) = body
            .checked_add(size)
            .and_then(|n| n.checked_add(size & 1))
        else {
            break;
        };
        idx = next;
    }

    let data = buf.get(CANONICAL_HEADER_LEN..).unwrap_or_default();
    Some(ParsedWav {
        format,
        data,
        has_format,
        header_fallback: true,
    })
}

/// Append a canonical 44-byte PCM header for `data_len` payload bytes
pub fn write_header(out: &mut Vec<u8>, format: &WavFormat, data_len: u32) {
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&format.audio_format.to_le_bytes());
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&format.byte_rate().to_le_bytes());
    out.extend_from_slice(&format.block_align().to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
}

/// Assembled audio plus the number of input buffers that were not WAV
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub audio: AudioResult,
    pub skipped: usize,
}

/// Concatenate per-chunk WAV containers into one.
///
/// A single valid input is passed through untouched. Format parameters come
/// from the first valid buffer.
pub fn merge(buffers: &[Vec<u8>]) -> Result<MergeOutput> {
    if let [only] = buffers {
        let parsed = parse_wav(only)
            .ok_or_else(|| TtsError::Audio("Synthesized chunk is not a WAV container".into()))?;
        let format = parsed.format;
        return Ok(MergeOutput {
            audio: AudioResult::new(only.clone(), format),
            skipped: 0,
        });
    }

    let mut parsed = Vec::with_capacity(buffers.len());
    let mut skipped = 0usize;
    for (index, buf) in buffers.iter().enumerate() {
        match parse_wav(buf) {
            Some(wav) => {
                if wav.header_fallback {
                    debug!(target: "audio", index, "No data chunk found; assuming 44-byte header");
                }
                parsed.push(wav);
            }
            None => {
                warn!(target: "audio", index, len = buf.len(), "Skipping chunk without RIFF header");
                skipped += 1;
            }
        }
    }

    let Some(first) = parsed.first() else {
        return Err(TtsError::Audio(format!(
            "None of the {} synthesized chunks is a WAV container",
            buffers.len()
        )));
    };
    let format = first.format;

    let total: usize = parsed.iter().map(|w| w.data.len()).sum();
    let data_len = u32::try_from(total)
        .ok()
        .filter(|len| *len <= u32::MAX - 36)
        .ok_or_else(|| TtsError::Audio(format!("Merged PCM payload of {} bytes exceeds WAV limits", total)))?;

    let mut out = Vec::with_capacity(CANONICAL_HEADER_LEN + total);
    write_header(&mut out, &format, data_len);
    for wav in &parsed {
        out.extend_from_slice(wav.data);
    }

    debug!(
        target: "audio",
        chunks = parsed.len(),
        skipped,
        bytes = out.len(),
        duration_ms = pcm_duration_ms(total, &format),
        "Merged audio chunks"
    );
    Ok(MergeOutput {
        audio: AudioResult::new(out, format),
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_with_samples(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in samples {
                writer.write_sample(*s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_parse_hound_output() {
        let wav = wav_with_samples(&[1, 2, 3], 16_000);
        let parsed = parse_wav(&wav).unwrap();
        assert!(parsed.has_format);
        assert!(!parsed.header_fallback);
        assert_eq!(parsed.format.sample_rate, 16_000);
        assert_eq!(parsed.data.len(), 6);
    }

    #[test]
    fn test_walks_odd_sized_chunks() {
        let base = wav_with_samples(&[7, 8], 22_050);
        // splice a 3-byte LIST chunk (plus pad byte) in front of fmt
        let mut buf = base[..12].to_vec();
        buf.extend_from_slice(b"LIST");
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0x00]);
        buf.extend_from_slice(&base[12..]);

        let parsed = parse_wav(&buf).unwrap();
        assert!(parsed.has_format);
        assert_eq!(parsed.data, &[7, 0, 8, 0]);
    }

    #[test]
    fn test_missing_data_chunk_uses_44_byte_fallback() {
        let mut buf = b"RIFF\x00\x00\x00\x00WAVE".to_vec();
        buf.extend_from_slice(b"junk");
        buf.extend_from_slice(&28u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 28]);
        buf.extend_from_slice(&[9, 9, 9, 9]);
        let parsed = parse_wav(&buf).unwrap();
        assert!(parsed.header_fallback);
        assert_eq!(parsed.data, &[9, 9, 9, 9]);
    }

    #[test]
    fn test_single_input_is_unchanged() {
        let wav = wav_with_samples(&[100, -100, 5], 22_050);
        let out = merge(&[wav.clone()]).unwrap();
        assert_eq!(out.audio.bytes, wav);
        assert_eq!(out.skipped, 0);
    }

    #[test]
    fn test_merge_sizes_and_order() {
        let a = wav_with_samples(&[1, 2, 3], 22_050);
        let b = wav_with_samples(&[4, 5], 22_050);
        let out = merge(&[a, b]).unwrap();
        let bytes = &out.audio.bytes;

        assert_eq!(read_u32(bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(read_u32(bytes, 40), 10);

        let reader = hound::WavReader::new(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(reader.spec().sample_rate, 22_050);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_invalid_chunks_are_skipped() {
        let a = wav_with_samples(&[1], 24_000);
        let out = merge(&[b"not audio".to_vec(), a]).unwrap();
        assert_eq!(out.skipped, 1);
        assert_eq!(out.audio.sample_rate, 24_000);
        assert_eq!(read_u32(&out.audio.bytes, 40), 2);
    }

    #[test]
    fn test_absurd_format_header_saturates() {
        let mut wav = wav_with_samples(&[1, 2], 22_050);
        // fmt body starts at 20: channels at 22, sample rate at 24
        wav[22..24].copy_from_slice(&40_000u16.to_le_bytes());
        wav[24..28].copy_from_slice(&u32::MAX.to_le_bytes());

        let parsed = parse_wav(&wav).unwrap();
        assert_eq!(parsed.format.block_align(), u16::MAX);
        assert_eq!(parsed.format.byte_rate(), u32::MAX);

        let out = merge(&[wav.clone(), wav]).unwrap();
        assert_eq!(read_u16(&out.audio.bytes, 32), u16::MAX);
        assert_eq!(read_u32(&out.audio.bytes, 40), 8);
    }

    #[test]
    fn test_all_invalid_is_error() {
        assert!(merge(&[vec![1, 2, 3], vec![]]).is_err());
        assert!(merge(&[]).is_err());
    }
}
