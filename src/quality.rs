//! Audio quality tiers and the download-quality fallback cascade

use std::fmt;

/// One audio encoding/bitrate variant offered by the service.
///
/// Tiers are totally ordered by a numeric rank (higher = better), with the
/// tier name as a stable tiebreak so cascades are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityTier {
    Master,
    Atmos2,
    Atmos51,
    Flac,
    Ogg640,
    Ogg320,
    Mp3_320,
    Ogg192,
    Mp3_128,
    Ogg96,
    Aac192,
    Aac96,
    Aac48,
}

/// All tiers, in declaration order (not cascade order).
const ALL_TIERS: [QualityTier; 13] = [
    QualityTier::Master,
    QualityTier::Atmos2,
    QualityTier::Atmos51,
    QualityTier::Flac,
    QualityTier::Ogg640,
    QualityTier::Ogg320,
    QualityTier::Mp3_320,
    QualityTier::Ogg192,
    QualityTier::Mp3_128,
    QualityTier::Ogg96,
    QualityTier::Aac192,
    QualityTier::Aac96,
    QualityTier::Aac48,
];

impl QualityTier {
    /// Numeric rank used for ordering and ceiling comparison.
    pub fn rank(&self) -> u32 {
        match self {
            QualityTier::Master => 130,
            QualityTier::Atmos2 => 120,
            QualityTier::Atmos51 => 110,
            QualityTier::Flac => 100,
            QualityTier::Ogg640 => 90,
            QualityTier::Ogg320 => 80,
            QualityTier::Mp3_320 => 70,
            QualityTier::Ogg192 => 60,
            QualityTier::Mp3_128 => 50,
            QualityTier::Ogg96 => 40,
            QualityTier::Aac192 => 30,
            QualityTier::Aac96 => 20,
            QualityTier::Aac48 => 10,
        }
    }

    /// Name used in API requests and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            QualityTier::Master => "MASTER",
            QualityTier::Atmos2 => "ATMOS_2",
            QualityTier::Atmos51 => "ATMOS_51",
            QualityTier::Flac => "FLAC",
            QualityTier::Ogg640 => "OGG_640",
            QualityTier::Ogg320 => "OGG_320",
            QualityTier::Mp3_320 => "MP3_320",
            QualityTier::Ogg192 => "OGG_192",
            QualityTier::Mp3_128 => "MP3_128",
            QualityTier::Ogg96 => "OGG_96",
            QualityTier::Aac192 => "AAC_192",
            QualityTier::Aac96 => "AAC_96",
            QualityTier::Aac48 => "AAC_48",
        }
    }

    /// File extension (with leading dot) for files downloaded at this tier.
    pub fn extension(&self) -> &'static str {
        match self {
            QualityTier::Master | QualityTier::Atmos2 | QualityTier::Atmos51 | QualityTier::Flac => {
                ".flac"
            }
            QualityTier::Ogg640 | QualityTier::Ogg320 | QualityTier::Ogg192 | QualityTier::Ogg96 => {
                ".ogg"
            }
            QualityTier::Mp3_320 | QualityTier::Mp3_128 => ".mp3",
            QualityTier::Aac192 | QualityTier::Aac96 | QualityTier::Aac48 => ".m4a",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The highest quality the user will accept.
#[derive(Debug, Clone, Copy)]
pub enum TierCeiling {
    Named(QualityTier),
    Rank(u32),
}

impl TierCeiling {
    fn rank(&self) -> u32 {
        match self {
            TierCeiling::Named(tier) => tier.rank(),
            TierCeiling::Rank(rank) => *rank,
        }
    }
}

/// Baseline tier every account can fetch; the fallback for bad ceilings.
pub const BASELINE_TIER: QualityTier = QualityTier::Mp3_128;

/// Compute the cascade of tiers to attempt for a requested ceiling.
///
/// Returns every tier whose rank does not exceed the ceiling, best-first
/// (descending rank, name ascending on ties). Any numeric ceiling is
/// honored as a threshold, even one between or above the known ranks; a
/// ceiling below every tier degrades to the single baseline tier rather
/// than failing, so callers always get a non-empty, usable cascade.
pub fn fallback_order(ceiling: TierCeiling) -> Vec<QualityTier> {
    let threshold = ceiling.rank();

    let mut tiers: Vec<QualityTier> = ALL_TIERS
        .iter()
        .copied()
        .filter(|t| t.rank() <= threshold)
        .collect();
    if tiers.is_empty() {
        return vec![BASELINE_TIER];
    }
    tiers.sort_by(|a, b| b.rank().cmp(&a.rank()).then(a.name().cmp(b.name())));
    tiers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_sorted_descending() {
        let tiers = fallback_order(TierCeiling::Named(QualityTier::Master));
        assert_eq!(tiers.len(), ALL_TIERS.len());
        for pair in tiers.windows(2) {
            assert!(pair[0].rank() > pair[1].rank());
        }
    }

    #[test]
    fn test_cascade_respects_ceiling() {
        let tiers = fallback_order(TierCeiling::Named(QualityTier::Mp3_320));
        assert!(tiers.iter().all(|t| t.rank() <= QualityTier::Mp3_320.rank()));
        assert_eq!(tiers[0], QualityTier::Mp3_320);
    }

    #[test]
    fn test_numeric_ceiling_matches_named() {
        assert_eq!(
            fallback_order(TierCeiling::Rank(100)),
            fallback_order(TierCeiling::Named(QualityTier::Flac))
        );
    }

    #[test]
    fn test_numeric_ceiling_between_tier_ranks() {
        // 55 sits between Mp3_128 (50) and Ogg192 (60): everything at or
        // below 50 is allowed, nothing above.
        let tiers = fallback_order(TierCeiling::Rank(55));
        assert_eq!(tiers[0], QualityTier::Mp3_128);
        assert_eq!(tiers.len(), 5);
        assert!(tiers.iter().all(|t| t.rank() <= 55));
    }

    #[test]
    fn test_numeric_ceiling_above_all_tiers() {
        let tiers = fallback_order(TierCeiling::Rank(9999));
        assert_eq!(tiers.len(), ALL_TIERS.len());
        assert_eq!(tiers[0], QualityTier::Master);
    }

    #[test]
    fn test_ceiling_below_all_tiers_falls_back() {
        assert_eq!(fallback_order(TierCeiling::Rank(0)), vec![BASELINE_TIER]);
        assert_eq!(fallback_order(TierCeiling::Rank(9)), vec![BASELINE_TIER]);
    }

    #[test]
    fn test_lowest_ceiling_is_single_tier() {
        assert_eq!(
            fallback_order(TierCeiling::Named(QualityTier::Aac48)),
            vec![QualityTier::Aac48]
        );
    }
}
