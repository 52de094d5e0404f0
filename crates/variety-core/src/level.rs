//! Hierarchy levels and the boundaries between them
//!
//! Five levels (S1 operations up to S5 policy) are joined by eight
//! boundaries: four filters attenuate variety moving up, four amplifiers
//! expand directives moving down.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VarietyError;

/// A level of the five-level control hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl Level {
    /// All levels, lowest first
    pub const ALL: [Level; 5] = [Level::S1, Level::S2, Level::S3, Level::S4, Level::S5];

    /// Numeric level (1-5)
    pub fn number(self) -> u8 {
        match self {
            Level::S1 => 1,
            Level::S2 => 2,
            Level::S3 => 3,
            Level::S4 => 4,
            Level::S5 => 5,
        }
    }

    /// Look up a level by its number
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Level::S1),
            2 => Some(Level::S2),
            3 => Some(Level::S3),
            4 => Some(Level::S4),
            5 => Some(Level::S5),
            _ => None,
        }
    }

    /// The level directly above, if any
    pub fn above(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    /// The level directly below, if any
    pub fn below(self) -> Option<Self> {
        self.number().checked_sub(1).and_then(Self::from_number)
    }

    /// The filter carrying this level's variety upward
    ///
    /// S5 has nothing above it.
    pub fn upward_filter(self) -> Option<Boundary> {
        match self {
            Level::S1 => Some(Boundary::S1ToS2),
            Level::S2 => Some(Boundary::S2ToS3),
            Level::S3 => Some(Boundary::S3ToS4),
            Level::S4 => Some(Boundary::S4ToS5),
            Level::S5 => None,
        }
    }

    /// The amplifier feeding directives into this level from above
    pub fn inbound_amplifier(self) -> Option<Boundary> {
        match self {
            Level::S1 => Some(Boundary::S2ToS1),
            Level::S2 => Some(Boundary::S3ToS2),
            Level::S3 => Some(Boundary::S4ToS3),
            Level::S4 => Some(Boundary::S5ToS4),
            Level::S5 => None,
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.number())
    }
}

/// Which way variety moves across a boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowDirection {
    /// Attenuated signals moving toward policy
    Upward,
    /// Amplified directives moving toward operations
    Downward,
}

/// Direction of a message relative to the level it is recorded against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// A boundary between two adjacent levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    S1ToS2,
    S2ToS3,
    S3ToS4,
    S4ToS5,
    S5ToS4,
    S4ToS3,
    S3ToS2,
    S2ToS1,
}

impl Boundary {
    /// Filter boundaries, lowest first
    pub const FILTERS: [Boundary; 4] = [
        Boundary::S1ToS2,
        Boundary::S2ToS3,
        Boundary::S3ToS4,
        Boundary::S4ToS5,
    ];

    /// Amplifier boundaries, highest first
    pub const AMPLIFIERS: [Boundary; 4] = [
        Boundary::S5ToS4,
        Boundary::S4ToS3,
        Boundary::S3ToS2,
        Boundary::S2ToS1,
    ];

    /// All eight boundaries
    pub fn all() -> impl Iterator<Item = Boundary> {
        Self::FILTERS.into_iter().chain(Self::AMPLIFIERS)
    }

    /// Stable identifier, e.g. `s1_to_s2`
    pub fn as_str(self) -> &'static str {
        match self {
            Boundary::S1ToS2 => "s1_to_s2",
            Boundary::S2ToS3 => "s2_to_s3",
            Boundary::S3ToS4 => "s3_to_s4",
            Boundary::S4ToS5 => "s4_to_s5",
            Boundary::S5ToS4 => "s5_to_s4",
            Boundary::S4ToS3 => "s4_to_s3",
            Boundary::S3ToS2 => "s3_to_s2",
            Boundary::S2ToS1 => "s2_to_s1",
        }
    }

    /// The level variety leaves
    pub fn source(self) -> Level {
        match self {
            Boundary::S1ToS2 => Level::S1,
            Boundary::S2ToS3 | Boundary::S2ToS1 => Level::S2,
            Boundary::S3ToS4 | Boundary::S3ToS2 => Level::S3,
            Boundary::S4ToS5 | Boundary::S4ToS3 => Level::S4,
            Boundary::S5ToS4 => Level::S5,
        }
    }

    /// The level variety arrives at
    pub fn destination(self) -> Level {
        match self {
            Boundary::S2ToS1 => Level::S1,
            Boundary::S1ToS2 | Boundary::S3ToS2 => Level::S2,
            Boundary::S2ToS3 | Boundary::S4ToS3 => Level::S3,
            Boundary::S3ToS4 | Boundary::S5ToS4 => Level::S4,
            Boundary::S4ToS5 => Level::S5,
        }
    }

    pub fn flow(self) -> FlowDirection {
        if self.destination() > self.source() {
            FlowDirection::Upward
        } else {
            FlowDirection::Downward
        }
    }

    pub fn is_filter(self) -> bool {
        self.flow() == FlowDirection::Upward
    }

    pub fn is_amplifier(self) -> bool {
        self.flow() == FlowDirection::Downward
    }

    /// Level this boundary's flow is recorded against
    ///
    /// Always the lower of the two levels: filters record at their source,
    /// amplifiers at their destination.
    pub fn metrics_level(self) -> Level {
        self.source().min(self.destination())
    }

    /// The boundary covering the same pair of levels in the other direction
    pub fn mirror(self) -> Boundary {
        match self {
            Boundary::S1ToS2 => Boundary::S2ToS1,
            Boundary::S2ToS3 => Boundary::S3ToS2,
            Boundary::S3ToS4 => Boundary::S4ToS3,
            Boundary::S4ToS5 => Boundary::S5ToS4,
            Boundary::S5ToS4 => Boundary::S4ToS5,
            Boundary::S4ToS3 => Boundary::S3ToS4,
            Boundary::S3ToS2 => Boundary::S2ToS3,
            Boundary::S2ToS1 => Boundary::S1ToS2,
        }
    }
}

impl Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Boundary {
    type Err = VarietyError;

    /// Accepts `s1_to_s2` style identifiers, case-insensitively, with an
    /// optional leading `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches(':').to_ascii_lowercase();
        Boundary::all()
            .find(|b| b.as_str() == normalized)
            .ok_or_else(|| VarietyError::InvalidBoundary(s.to_string()))
    }
}
