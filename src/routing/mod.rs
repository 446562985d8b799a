use crate::{Extension, PartyId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod matcher;

/// Where a matched rule delivers the call.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum RouteTarget {
    /// Deliver to a specific user's extension
    User { user_id: String },
}

/// Inclusive `HH:MM` clock range, compared lexicographically. A range
/// where `start > end` never matches; overnight ranges are not expanded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Match conditions for a routing rule. All present categories must pass
/// (logical AND); an absent or empty list always passes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RouteConditions {
    /// Caller number patterns, exact strings or globs with `*`
    #[serde(default)]
    pub caller_patterns: Vec<String>,
    /// Weekdays 0-6, 0 = Sunday
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,
}

impl RouteConditions {
    pub fn is_empty(&self) -> bool {
        self.caller_patterns.is_empty()
            && self.days_of_week.is_empty()
            && self.time_ranges.is_empty()
    }
}

/// Administrator-defined conditional mapping from an inbound phone number
/// to a target party. Lower priority values are evaluated first.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteRule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub phone_number_id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Match conditions
    #[serde(rename = "match", default)]
    pub conditions: RouteConditions,
    #[serde(flatten)]
    pub target: RouteTarget,
}

/// Routing decision produced for one inbound call. Derived fresh per call,
/// never cached: rule state and directory state change between calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub party: PartyId,
    pub extension: Extension,
}

/// Outcome of routing evaluation for an inbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResult {
    Deliver(RoutingDecision),
    NoRoute,
}

/// Routing rule container parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutesConfig {
    /// External routing rules file includes
    #[serde(default)]
    pub includes: Vec<String>,

    /// Directly defined routing rules
    #[serde(default)]
    pub rules: Vec<RouteRule>,
}

/// Route rule definitions in external files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExternalRoutes {
    pub rules: Vec<RouteRule>,
}

/// Loads rule files for deployments that keep routing rules on disk
/// instead of a database, merging `includes` and sorting by priority.
pub struct RuleFileLoader {
    base_path: std::path::PathBuf,
}

impl RuleFileLoader {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn load<P: AsRef<Path>>(&self, config_path: P) -> Result<RoutesConfig> {
        let config_content =
            std::fs::read_to_string(config_path).context("Failed to read routes config file")?;

        let mut config: RoutesConfig =
            toml::from_str(&config_content).context("Failed to parse routes config file")?;

        self.load_includes(&mut config)?;
        Ok(config)
    }

    fn load_includes(&self, config: &mut RoutesConfig) -> Result<()> {
        for include_path in &config.includes {
            let full_path = self.base_path.join(include_path);
            let content = std::fs::read_to_string(&full_path).with_context(|| {
                format!("Failed to read routes include file: {}", include_path)
            })?;

            let external_routes: ExternalRoutes = toml::from_str(&content).with_context(|| {
                format!("Failed to parse routes include file: {}", include_path)
            })?;

            config.rules.extend(external_routes.rules);
        }

        config.rules.sort_by_key(|rule| rule.priority);
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}
