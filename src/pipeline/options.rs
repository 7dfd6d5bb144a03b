// 압축 옵션 - 작업당 한 번 생성, 이후 변경 없음

use crate::pipeline::error::CompressError;
use crate::pipeline::resolution::Tier;

/// 기본 프레임레이트
pub const DEFAULT_FRAME_RATE: f64 = 30.0;
/// 출력 청크 크기 (1MB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
/// 비디오 코덱 (AVC Baseline, Level 4.0)
pub const VIDEO_CODEC: &str = "avc1.420028";
/// 오디오 코덱 (AAC-LC)
pub const AUDIO_CODEC: &str = "mp4a.40.2";
/// 오디오 비트레이트 (고정)
pub const AUDIO_BITRATE_BPS: u32 = 128_000;
/// 오디오 블록 크기 (샘플 프레임 수)
pub const AUDIO_BLOCK_FRAMES: usize = 1024;

/// 압축 설정
#[derive(Debug, Clone, PartialEq)]
pub struct CompressOptions {
    /// 비디오 비트레이트 (bps)
    pub bitrate_bps: u32,
    pub tier: Tier,
    pub frame_rate: f64,
    /// 먹서 출력 청크 크기 (bytes)
    pub chunk_size: usize,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self::for_tier(Tier::Original)
    }
}

impl CompressOptions {
    /// 티어 기본값 (비트레이트 = 티어 범위 중간값)
    pub fn for_tier(tier: Tier) -> Self {
        Self {
            bitrate_bps: tier.bitrate_range().midpoint(),
            tier,
            frame_rate: DEFAULT_FRAME_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_bitrate(mut self, bitrate_bps: u32) -> Self {
        self.bitrate_bps = bitrate_bps;
        self
    }

    /// 티어만 변경 (비트레이트 유지)
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// 프레임 간격 (μs)
    pub fn frame_duration_us(&self) -> f64 {
        1_000_000.0 / self.frame_rate
    }

    pub fn validate(&self) -> Result<(), CompressError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(CompressError::InvalidOptions(format!(
                "frame rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.bitrate_bps == 0 {
            return Err(CompressError::InvalidOptions("bitrate must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(CompressError::InvalidOptions("chunk size must be positive".into()));
        }
        if !self.tier.bitrate_range().contains(self.bitrate_bps) {
            log::warn!(
                "[COMPRESS] 비트레이트 {}bps가 {} 권장 범위 밖입니다",
                self.bitrate_bps,
                self.tier
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let opts = CompressOptions::default();
        assert_eq!(opts.tier, Tier::Original);
        assert_eq!(opts.frame_rate, 30.0);
        assert_eq!(opts.bitrate_bps, 6_000_000);
        assert_eq!(opts.chunk_size, 1024 * 1024);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_for_tier_uses_midpoint() {
        assert_eq!(CompressOptions::for_tier(Tier::Cap720).bitrate_bps, 4_000_000);
        let opts = CompressOptions::for_tier(Tier::Cap480).with_bitrate(700_000);
        assert_eq!(opts.bitrate_bps, 700_000);
        assert_eq!(opts.tier, Tier::Cap480);
    }

    #[test]
    fn test_frame_duration() {
        let opts = CompressOptions::default().with_frame_rate(25.0);
        assert_eq!(opts.frame_duration_us(), 40_000.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        for opts in [
            CompressOptions::default().with_frame_rate(0.0),
            CompressOptions::default().with_frame_rate(f64::NAN),
            CompressOptions::default().with_bitrate(0),
            CompressOptions::default().with_chunk_size(0),
        ] {
            let err = opts.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EncoderConfigRejected);
        }
    }

    #[test]
    fn test_out_of_range_bitrate_is_allowed() {
        let opts = CompressOptions::for_tier(Tier::Cap480).with_bitrate(20_000_000);
        assert!(opts.validate().is_ok());
    }
}
