// Audio assembly for synthesized speech

pub mod utils;
pub mod wav;

pub use wav::{merge, parse_wav, MergeOutput, ParsedWav, WavFormat};

use serde::Serialize;

/// One finished waveform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioResult {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioResult {
    pub fn new(bytes: Vec<u8>, format: WavFormat) -> Self {
        Self {
            bytes,
            sample_rate: format.sample_rate,
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback length derived from the PCM payload
    pub fn duration_ms(&self) -> u64 {
        let format = WavFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
            ..WavFormat::default()
        };
        let data_len = parse_wav(&self.bytes).map_or(0, |w| w.data.len());
        utils::pcm_duration_ms(data_len, &format)
    }
}
