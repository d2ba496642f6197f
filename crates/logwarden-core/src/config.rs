//! Configuration management for Logwarden

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alerting::MiniJinjaRenderer;
use crate::error::{Error, Result};
use crate::models::{Rule, MAX_QUERY_LIMIT};

/// Prefix for environment variable overrides (`LOGWARDEN_GENERAL__RUN_INTERVAL`)
pub const ENV_PREFIX: &str = "LOGWARDEN";

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    pub general: GeneralConfig,

    /// Rules keyed by table name
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,
}

/// What the poller does with a job stopped early because enough records came back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EarlyStopPolicy {
    /// Forward the partial result to the evaluator
    #[default]
    Forward,
    /// Drop it; the rule is not evaluated this cycle
    Discard,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Sleep between the end of one cycle and the start of the next
    #[serde(with = "humantime_serde")]
    pub run_interval: Duration,

    /// Message body template
    #[serde(alias = "sns_message_template")]
    pub message_template: String,

    /// Delay between query status polls
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Early-stop handling
    #[serde(default)]
    pub early_stop: EarlyStopPolicy,

    /// AWS region override
    #[serde(default)]
    pub aws_region: Option<String>,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            run_interval: Duration::from_secs(60),
            message_template: "{{ rule.name }}: {{ result.matched }} matching events".to_string(),
            poll_interval: default_poll_interval(),
            early_stop: EarlyStopPolicy::default(),
            aws_region: None,
        }
    }
}

/// Rule configuration as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule name; the table key when omitted
    #[serde(default)]
    pub name: Option<String>,

    pub log_group: String,

    pub num_events: i64,

    #[serde(with = "humantime_serde")]
    pub timeframe: Duration,

    pub query: String,

    pub sns_topic: String,

    #[serde(default)]
    pub notify_ok: bool,
}

impl RuleConfig {
    fn to_rule(&self, key: &str) -> Rule {
        Rule {
            name: self.name.clone().unwrap_or_else(|| key.to_string()),
            log_group: self.log_group.clone(),
            num_events: self.num_events,
            timeframe: self.timeframe,
            query: self.query.clone(),
            target: self.sns_topic.clone(),
            notify_ok: self.notify_ok,
        }
    }
}

impl Config {
    /// Load a TOML config file, applying `LOGWARDEN_*` environment overrides,
    /// and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");

        let source = std::fs::read_to_string(path)?;
        Self::layered(&source, Some(environment()))
    }

    /// Parse a TOML document without touching the filesystem or environment
    pub fn from_toml(source: &str) -> Result<Self> {
        Self::layered(source, None)
    }

    /// Parse `source`, apply `env` overrides on top, then validate.
    ///
    /// The document is read with `toml` so rule table keys keep their case;
    /// the `config` crate lowercases every key it sees.
    fn layered(source: &str, env: Option<::config::Environment>) -> Result<Self> {
        let mut document: toml::Table =
            toml::from_str(source).map_err(|e| Error::config(format!("invalid TOML: {e}")))?;

        if let Some(env) = env {
            let overrides: toml::Table = ::config::Config::builder()
                .add_source(env)
                .build()?
                .try_deserialize()?;
            merge_overrides(&mut document, overrides);
        }

        let config: Self = toml::Value::Table(document)
            .try_into()
            .map_err(|e| Error::config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.general.run_interval.is_zero() {
            return Err(Error::config("general.run_interval must be greater than zero"));
        }
        if self.general.poll_interval.is_zero() {
            return Err(Error::config("general.poll_interval must be greater than zero"));
        }
        MiniJinjaRenderer::new()
            .validate(&self.general.message_template)
            .map_err(|e| Error::config(format!("general.sns_message_template: {e}")))?;

        let mut names = HashSet::new();
        for (key, rule) in &self.rules {
            let rule = rule.to_rule(key);
            if !names.insert(rule.name.clone()) {
                return Err(Error::config(format!("duplicate rule name '{}'", rule.name)));
            }
            if rule.name.trim().is_empty() {
                return Err(Error::config(format!("rules.{key}: name must not be empty")));
            }
            if rule.log_group.trim().is_empty() {
                return Err(Error::config(format!("rules.{key}: log_group must not be empty")));
            }
            if rule.query.trim().is_empty() {
                return Err(Error::config(format!("rules.{key}: query must not be empty")));
            }
            if rule.target.trim().is_empty() {
                return Err(Error::config(format!("rules.{key}: sns_topic must not be empty")));
            }
            if !(1..=MAX_QUERY_LIMIT).contains(&rule.num_events) {
                return Err(Error::config(format!(
                    "rules.{key}: num_events must be between 1 and {MAX_QUERY_LIMIT}"
                )));
            }
            if rule.timeframe.is_zero() {
                return Err(Error::config(format!("rules.{key}: timeframe must be greater than zero")));
            }
            rule.window(Utc::now())
                .map_err(|_| Error::config(format!("rules.{key}: timeframe is too long")))?;
        }

        Ok(())
    }

    /// Rules ready for evaluation, sorted by name
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .map(|(key, rule)| rule.to_rule(key))
            .collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules.into_iter().map(Arc::new).collect()
    }
}

/// Environment override source, e.g. `LOGWARDEN_GENERAL__RUN_INTERVAL=30s`
fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Overlay environment values onto the file document.
///
/// Environment keys arrive lowercased, so they replace an existing key that
/// matches ignoring ASCII case and the file's spelling is kept.
fn merge_overrides(document: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        let key = document
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&key))
            .cloned()
            .unwrap_or(key);

        match value {
            toml::Value::Table(nested) => {
                if let Some(toml::Value::Table(existing)) = document.get_mut(&key) {
                    merge_overrides(existing, nested);
                } else {
                    document.insert(key, toml::Value::Table(nested));
                }
            }
            value => {
                document.insert(key, value);
            }
        }
    }
}
