//! Ad platform providers and entity classification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported advertising platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Meta Ads (Facebook/Instagram)
    Meta,

    /// Google Ads
    Google,
}

impl Provider {
    /// Entity levels this provider can mutate.
    ///
    /// Meta exposes status/budget mutations at every level; Google only
    /// supports campaign-level mutations through our integration.
    pub fn mutable_levels(&self) -> &'static [EntityLevel] {
        match self {
            Provider::Meta => &[EntityLevel::Campaign, EntityLevel::AdSet, EntityLevel::Ad],
            Provider::Google => &[EntityLevel::Campaign],
        }
    }

    /// Whether mutations are supported at the given level.
    pub fn supports_level(&self, level: EntityLevel) -> bool {
        self.mutable_levels().contains(&level)
    }

    /// Smallest budget unit the platform accepts, as a fraction of one
    /// currency unit. Google bills in micros; Meta in minor units (cents).
    pub fn budget_unit(&self) -> f64 {
        match self {
            Provider::Meta => 0.01,
            Provider::Google => 0.000_001,
        }
    }

    /// Round a budget amount to the platform's native unit.
    pub fn round_budget(&self, amount: f64) -> f64 {
        let unit = self.budget_unit();
        (amount / unit).round() * unit
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Meta => write!(f, "meta"),
            Provider::Google => write!(f, "google"),
        }
    }
}

/// Hierarchy level of a platform entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityLevel {
    Campaign,
    AdSet,
    Ad,
}

impl fmt::Display for EntityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityLevel::Campaign => write!(f, "campaign"),
            EntityLevel::AdSet => write!(f, "ad_set"),
            EntityLevel::Ad => write!(f, "ad"),
        }
    }
}

/// Live delivery status of a platform entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Entity is delivering
    Active,

    /// Entity is paused
    Paused,

    /// Entity was archived on the platform and can no longer be mutated
    Archived,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityStatus::Active => write!(f, "active"),
            EntityStatus::Paused => write!(f, "paused"),
            EntityStatus::Archived => write!(f, "archived"),
        }
    }
}

/// Which budget an action targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    /// Recurring daily budget
    Daily,

    /// Total lifetime budget
    Lifetime,
}

impl fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetKind::Daily => write!(f, "daily"),
            BudgetKind::Lifetime => write!(f, "lifetime"),
        }
    }
}
