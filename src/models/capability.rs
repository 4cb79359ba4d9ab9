use serde::{Deserialize, Serialize};

use super::rule::RuleCategory;

/// How well one adapter supports one rule category.
///
/// Capabilities are declared, not computed: they are configuration handed to
/// the adapter at construction and used for routing and for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub category: RuleCategory,
    pub support: SupportLevel,
    pub direction: Direction,
    /// Free-text caveat shown to guardians.
    #[serde(default)]
    pub note: String,
}

impl Capability {
    pub fn new(
        category: RuleCategory,
        support: SupportLevel,
        direction: Direction,
        note: impl Into<String>,
    ) -> Self {
        Self {
            category,
            support,
            direction,
            note: note.into(),
        }
    }

    pub fn full(category: RuleCategory) -> Self {
        Self::new(category, SupportLevel::Full, Direction::PushOnly, "")
    }

    pub fn partial(category: RuleCategory, note: impl Into<String>) -> Self {
        Self::new(category, SupportLevel::Partial, Direction::PushOnly, note)
    }
}

/// Support level, ordered `None < Partial < Full`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SupportLevel {
    None,
    Partial,
    Full,
}

impl SupportLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "partial" => Some(Self::Partial),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Which way state flows between Guardline and the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    PushOnly,
    PullOnly,
    Bidirectional,
}

/// Look up the declared support for `category` in a capability table.
/// Categories absent from the table have no support.
pub fn support_for(capabilities: &[Capability], category: &RuleCategory) -> SupportLevel {
    capabilities
        .iter()
        .find(|c| &c.category == category)
        .map(|c| c.support)
        .unwrap_or(SupportLevel::None)
}
