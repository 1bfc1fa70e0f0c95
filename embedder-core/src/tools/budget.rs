//! Size policy for uploads: 25 MB decimal, integer arithmetic throughout.

pub const MAX_UPLOAD_BYTES: u64 = 25 * 1000 * 1000;
pub const TARGET_SIZE_BITS: u64 = MAX_UPLOAD_BYTES * 8;
pub const COMPRESS_AUDIO_BITRATE: u64 = 128 * 1000;
pub const TRANSCODE_AUDIO_BITRATE: &str = "160k";

const BUFFER_DIVISOR: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateBudget {
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    pub buffer_size: u64,
}

impl BitrateBudget {
    /// `None` when the clip is so long that the audio track alone would use
    /// the whole size budget.
    pub fn for_duration(duration_seconds: u64) -> Option<Self> {
        if duration_seconds == 0 {
            return None;
        }
        let total_bitrate = TARGET_SIZE_BITS / duration_seconds;
        let video_bitrate = total_bitrate
            .checked_sub(COMPRESS_AUDIO_BITRATE)
            .filter(|bitrate| *bitrate > 0)?;
        Some(Self {
            video_bitrate,
            audio_bitrate: COMPRESS_AUDIO_BITRATE,
            buffer_size: TARGET_SIZE_BITS / BUFFER_DIVISOR,
        })
    }
}

pub fn exceeds_upload_limit(size_bytes: u64) -> bool {
    size_bytes > MAX_UPLOAD_BYTES
}

/// Whole seconds of an ffprobe duration plus one, so a budget computed from it
/// never overshoots because of the dropped fraction.
pub fn parse_duration_ceiling(raw: &str) -> Option<u64> {
    let whole = raw.trim().split('.').next()?;
    whole.parse::<u64>().ok().map(|seconds| seconds + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_minute_budget() {
        let budget = BitrateBudget::for_duration(60).unwrap();
        assert_eq!(budget.video_bitrate, 3_205_333);
        assert_eq!(budget.audio_bitrate, 128_000);
        assert_eq!(budget.buffer_size, 10_000_000);
    }

    #[test]
    fn no_budget_for_zero_or_overlong_durations() {
        assert!(BitrateBudget::for_duration(0).is_none());
        // 200_000_000 / 1563 = 127_959 < 128_000
        assert!(BitrateBudget::for_duration(1_563).is_none());
        assert!(BitrateBudget::for_duration(1_562).is_some());
    }

    #[test]
    fn duration_is_truncated_then_bumped() {
        assert_eq!(parse_duration_ceiling("125.7"), Some(126));
        assert_eq!(parse_duration_ceiling("125.0\n"), Some(126));
        assert_eq!(parse_duration_ceiling("59"), Some(60));
    }

    #[test]
    fn unparseable_duration() {
        assert_eq!(parse_duration_ceiling("N/A"), None);
        assert_eq!(parse_duration_ceiling(""), None);
        assert_eq!(parse_duration_ceiling(".5"), None);
    }

    #[test]
    fn threshold_is_strict() {
        assert!(!exceeds_upload_limit(25_000_000));
        assert!(exceeds_upload_limit(25_000_001));
        assert!(!exceeds_upload_limit(10 * 1000 * 1000));
    }
}
