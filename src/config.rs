use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub filters: Vec<MessageFilter>,
}

/// Engine-lifetime tuning knobs. Every field has a default so a config file
/// may omit the whole section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_evaluation_timeout_ms")]
    pub evaluation_timeout_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_window_ms")]
    pub reset_window_ms: u64,
    #[serde(default = "default_backtrack_limit")]
    pub backtrack_limit: usize,
}

fn default_evaluation_timeout_ms() -> u64 {
    100
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_window_ms() -> u64 {
    60_000
}

fn default_backtrack_limit() -> usize {
    1_000_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            evaluation_timeout_ms: default_evaluation_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            reset_window_ms: default_reset_window_ms(),
            backtrack_limit: default_backtrack_limit(),
        }
    }
}

impl EngineSettings {
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_ms)
    }

    pub fn reset_window(&self) -> Duration {
        Duration::from_millis(self.reset_window_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.failure_threshold == 0 {
            anyhow::bail!("settings.failure_threshold must be at least 1");
        }
        if self.evaluation_timeout_ms == 0 {
            anyhow::bail!("settings.evaluation_timeout_ms must be at least 1");
        }
        Ok(())
    }
}

/// A user-authored rule applied to inbound channel messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFilter {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    #[serde(default)]
    pub pattern: String,
    pub action: FilterAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_to_agent: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_mode: Option<MatchMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl MessageFilter {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        filter_type: FilterType,
        pattern: impl Into<String>,
        action: FilterAction,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            filter_type,
            pattern: pattern.into(),
            action,
            route_to_agent: None,
            priority: 0,
            case_sensitive: None,
            match_mode: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_route(mut self, agent: impl Into<String>) -> Self {
        self.route_to_agent = Some(agent.into());
        self
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = Some(mode);
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Regex,
    Keyword,
    Sender,
    Time,
    Frequency,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterType::Regex => "regex",
            FilterType::Keyword => "keyword",
            FilterType::Sender => "sender",
            FilterType::Time => "time",
            FilterType::Frequency => "frequency",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Block,
    Allow,
    Route,
    Flag,
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterAction::Block => "block",
            FilterAction::Allow => "allow",
            FilterAction::Route => "route",
            FilterAction::Flag => "flag",
        };
        f.write_str(name)
    }
}

/// Keyword combination: `any` is OR, `all` is AND.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            settings: EngineSettings::default(),
            filters: vec![
                MessageFilter::new(
                    "block-lottery-spam",
                    "Block lottery spam",
                    FilterType::Regex,
                    r"^(spam|casino|lottery|prize)",
                    FilterAction::Block,
                )
                .with_priority(10),
                MessageFilter::new(
                    "route-urgent",
                    "Route urgent requests to on-call",
                    FilterType::Keyword,
                    "urgent, emergency",
                    FilterAction::Route,
                )
                .with_route("oncall-agent")
                .with_priority(20),
                MessageFilter::new(
                    "flag-links",
                    "Flag messages carrying links",
                    FilterType::Regex,
                    r"https?://",
                    FilterAction::Flag,
                )
                .with_priority(50),
            ],
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {path}"))?;
        config
            .settings
            .validate()
            .with_context(|| format!("Invalid settings in {path}"))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file: {path}"))?;
        Ok(())
    }
}
