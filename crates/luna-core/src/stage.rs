//! Sleep stage enumeration, shared by the annotation model and the POPS
//! classifier's class ordering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A scored sleep stage, plus the non-scoring labels Luna carries through
/// the timeline (movement, lights, unscored, unknown, and recording gaps).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Stage {
    Wake,
    Rem,
    N1,
    N2,
    N3,
    /// NREM4; collapses to `N3` for the 5-class model.
    N4,
    Movement,
    LightsOn,
    Unscored,
    Unknown,
    Gap,
}

impl Stage {
    /// Collapse to the 5-class model (`W, R, N1, N2, N3`); `N4` folds into `N3`.
    #[must_use]
    pub fn collapse5(self) -> Self {
        if matches!(self, Self::N4) {
            Self::N3
        } else {
            self
        }
    }

    /// `true` if this is one of the five scorable NREM/REM/wake stages.
    #[must_use]
    pub fn is_scorable5(self) -> bool {
        matches!(
            self.collapse5(),
            Self::Wake | Self::Rem | Self::N1 | Self::N2 | Self::N3
        )
    }

    /// `true` if this stage counts toward elapsed sleep (any non-wake
    /// scorable stage).
    #[must_use]
    pub fn is_sleep(self) -> bool {
        self.is_scorable5() && !matches!(self, Self::Wake)
    }

    /// `true` if this is a NREM stage (`N1`/`N2`/`N3`, after 5-class collapse).
    #[must_use]
    pub fn is_nrem(self) -> bool {
        matches!(self.collapse5(), Self::N1 | Self::N2 | Self::N3)
    }

    /// Canonical 0-based class index for the 5-class model:
    /// `W=0, R=1, N1=2, N2=3, N3=4`. `None` for non-scorable stages.
    #[must_use]
    pub fn class_index5(self) -> Option<usize> {
        match self.collapse5() {
            Self::Wake => Some(0),
            Self::Rem => Some(1),
            Self::N1 => Some(2),
            Self::N2 => Some(3),
            Self::N3 => Some(4),
            _ => None,
        }
    }

    /// Canonical 0-based class index for the 3-class model:
    /// `W=0, R=1, NR=2` (N1+N2+N3 collapse to NR).
    #[must_use]
    pub fn class_index3(self) -> Option<usize> {
        match self.collapse5() {
            Self::Wake => Some(0),
            Self::Rem => Some(1),
            Self::N1 | Self::N2 | Self::N3 => Some(2),
            _ => None,
        }
    }

    /// Canonical class label, matching the `label(pops_stage_t)` helper: the
    /// 3-class model renders `N1`/`N2`/`N3` all as `NR`.
    #[must_use]
    pub fn label(self, n_stages: u8) -> &'static str {
        match self.collapse5() {
            Self::Wake => "W",
            Self::Rem => "R",
            Self::N1 | Self::N2 | Self::N3 if n_stages == 3 => "NR",
            Self::N1 => "N1",
            Self::N2 => "N2",
            Self::N3 => "N3",
            Self::Movement => "M",
            Self::LightsOn => "L",
            Self::Unscored => "U",
            Self::Unknown => "?",
            Self::Gap => "GAP",
            Self::N4 => unreachable!("collapse5 removes N4"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n4_collapses_to_n3() {
        assert_eq!(Stage::N4.collapse5(), Stage::N3);
        assert_eq!(Stage::N4.class_index5(), Some(4));
    }

    #[test]
    fn three_class_collapses_nrem() {
        assert_eq!(Stage::N1.class_index3(), Some(2));
        assert_eq!(Stage::N2.class_index3(), Some(2));
        assert_eq!(Stage::N1.label(3), "NR");
    }
}
