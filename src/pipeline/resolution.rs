// 해상도 계획 - 요청 티어 + 소스 크기 → 출력 Geometry
// 다운스케일만 허용 (업스케일 없음), 양 축 짝수 보장 (YUV420 크로마 서브샘플링)

use std::fmt;
use std::str::FromStr;

/// 출력 해상도 티어
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tier {
    /// 원본 해상도 유지
    #[default]
    Original,
    /// 세로 720 이하로 제한
    Cap720,
    /// 세로 480 이하로 제한
    Cap480,
}

/// 티어별 권장 비트레이트 범위 (bps)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateRange {
    pub min: u32,
    pub max: u32,
}

impl BitrateRange {
    /// 범위 중간값 (기본 비트레이트)
    pub fn midpoint(&self) -> u32 {
        ((u64::from(self.min) + u64::from(self.max) + 1) / 2) as u32
    }

    pub fn contains(&self, bitrate_bps: u32) -> bool {
        (self.min..=self.max).contains(&bitrate_bps)
    }
}

impl Tier {
    /// 세로 상한 (Original은 None)
    pub fn max_height(&self) -> Option<u32> {
        match self {
            Tier::Original => None,
            Tier::Cap720 => Some(720),
            Tier::Cap480 => Some(480),
        }
    }

    pub fn bitrate_range(&self) -> BitrateRange {
        match self {
            Tier::Original => BitrateRange { min: 2_000_000, max: 10_000_000 },
            Tier::Cap720 => BitrateRange { min: 1_000_000, max: 7_000_000 },
            Tier::Cap480 => BitrateRange { min: 500_000, max: 5_000_000 },
        }
    }

    /// C ABI 인덱스 → 티어 (0=Original, 1=720p, 2=480p)
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Tier::Original),
            1 => Some(Tier::Cap720),
            2 => Some(Tier::Cap480),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Original => "Original",
            Tier::Cap720 => "720p",
            Tier::Cap480 => "480p",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resolution tier '{0}' (expected Original, 720p or 480p)")]
pub struct ParseTierError(String);

impl FromStr for Tier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(Tier::Original),
            "720p" | "720" | "cap720" => Ok(Tier::Cap720),
            "480p" | "480" | "cap480" => Ok(Tier::Cap480),
            _ => Err(ParseTierError(s.to_string())),
        }
    }
}

/// 출력 프레임 크기 (항상 짝수)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 출력 해상도 계산
/// - 소스 세로가 티어 상한을 넘으면 상한으로 맞추고 가로는 비율 유지 (반올림)
/// - 그 외에는 소스 크기 그대로
/// - 마지막으로 홀수 축은 1 감소
pub fn plan(source_width: u32, source_height: u32, tier: Tier) -> Geometry {
    let (width, height) = match tier.max_height() {
        Some(cap) if source_height > cap => {
            let scaled = f64::from(source_width) * f64::from(cap) / f64::from(source_height);
            (scaled.round() as u32, cap)
        }
        _ => (source_width, source_height),
    };

    Geometry {
        width: even_floor(width),
        height: even_floor(height),
    }
}

#[inline]
fn even_floor(value: u32) -> u32 {
    value - (value % 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_keeps_even_source() {
        assert_eq!(plan(1920, 1080, Tier::Original), Geometry { width: 1920, height: 1080 });
    }

    #[test]
    fn test_original_rounds_odd_down() {
        assert_eq!(plan(301, 301, Tier::Original), Geometry { width: 300, height: 300 });
    }

    #[test]
    fn test_cap720_from_1080p() {
        assert_eq!(plan(1920, 1080, Tier::Cap720), Geometry { width: 1280, height: 720 });
    }

    #[test]
    fn test_cap480_from_1080p() {
        // 1920 * 480 / 1080 = 853.33 → 853 → 852
        assert_eq!(plan(1920, 1080, Tier::Cap480), Geometry { width: 852, height: 480 });
    }

    #[test]
    fn test_portrait_source() {
        // 1080 * 720 / 1920 = 405 → 404
        assert_eq!(plan(1080, 1920, Tier::Cap720), Geometry { width: 404, height: 720 });
    }

    #[test]
    fn test_never_upscales() {
        assert_eq!(plan(640, 360, Tier::Cap720), Geometry { width: 640, height: 360 });
        assert_eq!(plan(300, 300, Tier::Cap480), Geometry { width: 300, height: 300 });
        assert_eq!(plan(640, 481, Tier::Cap720), Geometry { width: 640, height: 480 });
    }

    #[test]
    fn test_height_at_or_below_cap_is_tier_independent() {
        for (w, h) in [(320u32, 240u32), (721, 479), (1279, 480), (99, 33)] {
            let original = plan(w, h, Tier::Original);
            assert_eq!(plan(w, h, Tier::Cap480), original);
            assert_eq!(plan(w, h, Tier::Cap720), original);
        }
    }

    #[test]
    fn test_capped_geometry_preserves_aspect() {
        for w in (200u32..4000).step_by(37) {
            for h in (721u32..2200).step_by(53) {
                for (tier, cap) in [(Tier::Cap720, 720u32), (Tier::Cap480, 480u32)] {
                    let g = plan(w, h, tier);
                    assert_eq!(g.height, cap);
                    assert_eq!(g.width % 2, 0);
                    let exact = f64::from(w) * f64::from(cap) / f64::from(h);
                    // 반올림 0.5 + 짝수 보정 1 → 최대 1.5
                    assert!((f64::from(g.width) - exact).abs() <= 1.5, "{}x{} → {}", w, h, g);
                }
            }
        }
    }

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("Original".parse::<Tier>().unwrap(), Tier::Original);
        assert_eq!("720p".parse::<Tier>().unwrap(), Tier::Cap720);
        assert_eq!(" 480P ".parse::<Tier>().unwrap(), Tier::Cap480);
        assert!("1080p".parse::<Tier>().is_err());
        assert_eq!(Tier::Cap720.to_string(), "720p");
        assert_eq!(Tier::from_index(2), Some(Tier::Cap480));
        assert_eq!(Tier::from_index(3), None);
    }

    #[test]
    fn test_bitrate_ranges() {
        assert_eq!(Tier::Original.bitrate_range().midpoint(), 6_000_000);
        assert_eq!(Tier::Cap720.bitrate_range().midpoint(), 4_000_000);
        assert_eq!(Tier::Cap480.bitrate_range().midpoint(), 2_750_000);
        assert!(Tier::Cap480.bitrate_range().contains(500_000));
        assert!(!Tier::Cap480.bitrate_range().contains(5_000_001));
    }
}
