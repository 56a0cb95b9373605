//! Shared audio utilities.

use super::WavFormat;

/// Playback length of `data_len` PCM bytes in `format`
#[inline]
pub fn pcm_duration_ms(data_len: usize, format: &WavFormat) -> u64 {
    let byte_rate = format.byte_rate() as u64;
    if byte_rate == 0 {
        return 0;
    }
    data_len as u64 * 1000 / byte_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let format = WavFormat::default();
        assert_eq!(pcm_duration_ms(44_100, &format), 1000);
        let broken = WavFormat {
            channels: 0,
            ..WavFormat::default()
        };
        assert_eq!(pcm_duration_ms(10, &broken), 0);
    }
}
