use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Channel layout of a bus, one bit per speaker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpeakerArrangement(u64);

impl SpeakerArrangement {
    pub const NONE: Self = Self(0);
    pub const FRONT_LEFT: Self = Self(0x1);
    pub const FRONT_RIGHT: Self = Self(0x2);
    pub const FRONT_CENTER: Self = Self(0x4);
    pub const LOW_FREQUENCY: Self = Self(0x8);
    pub const BACK_LEFT: Self = Self(0x10);
    pub const BACK_RIGHT: Self = Self(0x20);
    /// Marks a side-chain or auxiliary bus.
    pub const AUX: Self = Self(1 << 63);

    pub const MONO: Self = Self::FRONT_LEFT;
    pub const STEREO: Self = Self(Self::FRONT_LEFT.0 | Self::FRONT_RIGHT.0);
    pub const STEREO_21: Self = Self(Self::STEREO.0 | Self::LOW_FREQUENCY.0);
    pub const STEREO_30: Self = Self(Self::STEREO.0 | Self::FRONT_CENTER.0);
    pub const STEREO_31: Self = Self(Self::STEREO_30.0 | Self::LOW_FREQUENCY.0);
    pub const SURROUND_50: Self = Self(Self::STEREO_30.0 | Self::BACK_LEFT.0 | Self::BACK_RIGHT.0);
    pub const SURROUND_51: Self = Self(Self::SURROUND_50.0 | Self::LOW_FREQUENCY.0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// The speaker bits without the AUX flag.
    pub const fn channels(self) -> Self {
        Self(self.0 & !Self::AUX.0)
    }

    pub const fn count_channels(self) -> usize {
        self.channels().0.count_ones() as usize
    }

    pub const fn is_aux(self) -> bool {
        self.0 & Self::AUX.0 != 0
    }

    /// Every speaker of `self` is also present in `other`.
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.channels().0 & !other.channels().0 == 0
    }

    pub fn desc(self) -> String {
        let named = match self.channels() {
            Self::NONE => Some("none"),
            Self::MONO => Some("mono"),
            Self::STEREO => Some("stereo"),
            Self::STEREO_21 => Some("stereo-2.1"),
            Self::STEREO_30 => Some("stereo-3.0"),
            Self::STEREO_31 => Some("stereo-3.1"),
            Self::SURROUND_50 => Some("surround-5.0"),
            Self::SURROUND_51 => Some("surround-5.1"),
            _ => None,
        };
        let mut out = match named {
            Some(name) => name.to_string(),
            None => {
                const NAMES: [(SpeakerArrangement, &str); 6] = [
                    (SpeakerArrangement::FRONT_LEFT, "FL"),
                    (SpeakerArrangement::FRONT_RIGHT, "FR"),
                    (SpeakerArrangement::FRONT_CENTER, "FC"),
                    (SpeakerArrangement::LOW_FREQUENCY, "LFE"),
                    (SpeakerArrangement::BACK_LEFT, "BL"),
                    (SpeakerArrangement::BACK_RIGHT, "BR"),
                ];
                let parts: Vec<&str> = NAMES
                    .iter()
                    .filter(|(bit, _)| self.0 & bit.0 != 0)
                    .map(|(_, name)| *name)
                    .collect();
                if parts.is_empty() {
                    format!("{:#x}", self.channels().0)
                } else {
                    parts.join("|")
                }
            }
        };
        if self.is_aux() {
            out.insert_str(0, "aux-");
        }
        out
    }
}

impl BitOr for SpeakerArrangement {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for SpeakerArrangement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.desc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_channels_ignores_aux() {
        assert_eq!(SpeakerArrangement::MONO.count_channels(), 1);
        assert_eq!(SpeakerArrangement::STEREO.count_channels(), 2);
        assert_eq!(SpeakerArrangement::SURROUND_51.count_channels(), 6);
        let aux = SpeakerArrangement::STEREO | SpeakerArrangement::AUX;
        assert!(aux.is_aux());
        assert_eq!(aux.count_channels(), 2);
        assert_eq!(aux.channels(), SpeakerArrangement::STEREO);
    }

    #[test]
    fn test_subset() {
        assert!(SpeakerArrangement::MONO.is_subset_of(SpeakerArrangement::STEREO));
        assert!(!SpeakerArrangement::STEREO.is_subset_of(SpeakerArrangement::MONO));
        assert!(SpeakerArrangement::STEREO.is_subset_of(SpeakerArrangement::SURROUND_50));
        assert!(SpeakerArrangement::NONE.is_subset_of(SpeakerArrangement::NONE));
    }

    #[test]
    fn test_desc() {
        assert_eq!(SpeakerArrangement::STEREO.to_string(), "stereo");
        assert_eq!(
            (SpeakerArrangement::FRONT_CENTER | SpeakerArrangement::BACK_LEFT).desc(),
            "FC|BL"
        );
        assert_eq!(
            (SpeakerArrangement::MONO | SpeakerArrangement::AUX).desc(),
            "aux-mono"
        );
    }
}
