use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{BitOr, Sub};

/// How strictly a collection applies its validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Validation is skipped.
    Off,
    /// Updates of documents that already fail validation are allowed.
    Moderate,
    /// Every insert and update is validated.
    #[default]
    Strict,
}

/// What happens to a document that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationAction {
    /// The write is rejected.
    #[default]
    Error,
    /// The failure is logged and the write goes through.
    Warn,
}

impl Display for ValidationLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationLevel::Off => write!(f, "off"),
            ValidationLevel::Moderate => write!(f, "moderate"),
            ValidationLevel::Strict => write!(f, "strict"),
        }
    }
}

impl Display for ValidationAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationAction::Error => write!(f, "error"),
            ValidationAction::Warn => write!(f, "warn"),
        }
    }
}

/// Query language version a validator may use. Operators added in a later
/// version are refused while the deployment is pinned to an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureVersion {
    V1 = 1,
    V2 = 2,
}

impl FeatureVersion {
    pub fn latest() -> Self {
        FeatureVersion::V2
    }
}

/// Set of language features a validator may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllowedFeatures(u32);

impl AllowedFeatures {
    pub const NONE: AllowedFeatures = AllowedFeatures(0);
    pub const ENCRYPT_KEYWORDS: AllowedFeatures = AllowedFeatures(1);
    pub const REGEX: AllowedFeatures = AllowedFeatures(1 << 1);
    pub const ALL: AllowedFeatures = AllowedFeatures(0b11);

    pub fn contains(&self, other: AllowedFeatures) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AllowedFeatures {
    type Output = AllowedFeatures;

    fn bitor(self, rhs: Self) -> Self::Output {
        AllowedFeatures(self.0 | rhs.0)
    }
}

impl Sub for AllowedFeatures {
    type Output = AllowedFeatures;

    fn sub(self, rhs: Self) -> Self::Output {
        AllowedFeatures(self.0 & !rhs.0)
    }
}
