//! Structured configuration with environment-variable overrides.
//!
//! The recognised option tree mirrors the subsystems: `models`, `routing`,
//! `cache`, `escalation`, `ledger`. Environment overrides use the
//! `SIGNAL_HUB_` prefix with nested keys flattened by `_`, e.g.
//! `SIGNAL_HUB_CACHE_MAX_ENTRIES=5000`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

use crate::cache::CacheConfig;
use crate::costs::PricingTable;
use crate::error::{Error, Result};
use crate::routing::rules::{ComplexityBasedRule, LengthBasedRule, RuleStack, TaskTypeRule};
use crate::routing::types::ModelTier;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SIGNAL_HUB_";

/// Per-rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSettings {
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    /// Rule-specific parameters (thresholds, keyword sets, mappings)
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Routing section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    pub default_model: ModelTier,
    pub rules: Vec<RuleSettings>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            default_model: ModelTier::Medium,
            rules: vec![
                RuleSettings {
                    name: "length_based".to_string(),
                    enabled: true,
                    priority: 10,
                    parameters: serde_json::Value::Null,
                },
                RuleSettings {
                    name: "complexity_based".to_string(),
                    enabled: true,
                    priority: 20,
                    parameters: serde_json::Value::Null,
                },
                RuleSettings {
                    name: "task_type".to_string(),
                    enabled: true,
                    priority: 30,
                    parameters: serde_json::Value::Null,
                },
            ],
        }
    }
}

impl RoutingSettings {
    /// Build the rule stack described by this section.
    pub fn build_stack(&self) -> Result<RuleStack> {
        let mut stack = RuleStack::new();

        for settings in &self.rules {
            match settings.name.as_str() {
                "length_based" => {
                    let mut rule = LengthBasedRule::default();
                    rule.enabled = settings.enabled;
                    rule.priority = settings.priority;
                    if let Some(v) = settings.parameters.get("small_threshold") {
                        rule.small_threshold = parse_json_usize(v, "small_threshold")?;
                    }
                    if let Some(v) = settings.parameters.get("medium_threshold") {
                        rule.medium_threshold = parse_json_usize(v, "medium_threshold")?;
                    }
                    if rule.small_threshold >= rule.medium_threshold {
                        return Err(Error::Config(
                            "small_threshold must be less than medium_threshold".to_string(),
                        ));
                    }
                    stack.add_rule(Box::new(rule));
                }
                "complexity_based" => {
                    let mut rule = ComplexityBasedRule::default();
                    rule.enabled = settings.enabled;
                    rule.priority = settings.priority;
                    if let Some(words) = keyword_set(&settings.parameters, "simple_indicators") {
                        rule.simple_indicators = words;
                    }
                    if let Some(words) = keyword_set(&settings.parameters, "moderate_indicators") {
                        rule.moderate_indicators = words;
                    }
                    if let Some(words) = keyword_set(&settings.parameters, "complex_indicators") {
                        rule.complex_indicators = words;
                    }
                    stack.add_rule(Box::new(rule));
                }
                "task_type" => {
                    let mut rule = TaskTypeRule::default();
                    rule.enabled = settings.enabled;
                    rule.priority = settings.priority;
                    if let Some(mappings) = settings.parameters.get("task_mappings") {
                        let mappings: HashMap<String, String> =
                            serde_json::from_value(mappings.clone()).map_err(|e| {
                                Error::Config(format!("invalid task_mappings: {}", e))
                            })?;
                        rule.task_mappings = mappings
                            .into_iter()
                            .map(|(task, tier)| -> Result<(String, ModelTier)> {
                                Ok((task, ModelTier::from_str(&tier)?))
                            })
                            .collect::<Result<_>>()?;
                    }
                    stack.add_rule(Box::new(rule));
                }
                other => {
                    return Err(Error::Config(format!("unknown routing rule: {}", other)));
                }
            }
        }

        Ok(stack)
    }
}

fn parse_json_usize(value: &serde_json::Value, key: &str) -> Result<usize> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| Error::Config(format!("{} must be a non-negative integer", key)))
}

fn keyword_set(
    parameters: &serde_json::Value,
    key: &str,
) -> Option<std::collections::HashSet<String>> {
    parameters.get(key).and_then(|v| {
        v.as_array().map(|words| {
            words
                .iter()
                .filter_map(|w| w.as_str().map(str::to_string))
                .collect()
        })
    })
}

/// Escalation section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationSettings {
    pub session_default_duration_minutes: i64,
    pub inline_hints_enabled: bool,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            session_default_duration_minutes: 30,
            inline_hints_enabled: true,
        }
    }
}

/// Ledger section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    pub retention_days: u32,
    pub storage_path: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            retention_days: 90,
            storage_path: "signal_hub_ledger.db".to_string(),
        }
    }
}

/// Full configuration object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub models: PricingTable,
    pub routing: RoutingSettings,
    pub cache: CacheConfig,
    pub escalation: EscalationSettings,
    pub ledger: LedgerSettings,
}

impl Settings {
    /// Defaults with environment overrides applied and validated.
    ///
    /// A failure here is fatal: the process refuses to serve on invalid
    /// configuration.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `SIGNAL_HUB_`-prefixed environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        override_parse(
            "ROUTING_DEFAULT_MODEL",
            &mut self.routing.default_model,
        )?;

        override_bool("CACHE_ENABLED", &mut self.cache.enabled)?;
        override_parse(
            "CACHE_SIMILARITY_THRESHOLD",
            &mut self.cache.similarity_threshold,
        )?;
        override_parse("CACHE_TTL_HOURS", &mut self.cache.ttl_hours)?;
        override_parse("CACHE_MAX_ENTRIES", &mut self.cache.max_entries)?;
        override_parse("CACHE_MAX_MEMORY_MB", &mut self.cache.max_memory_mb)?;
        override_bool("CACHE_CONTEXT_AWARE", &mut self.cache.context_aware)?;
        if let Some(value) = env_value("CACHE_STORAGE_BACKEND") {
            self.cache.storage_backend = parse_enum_value(&value, "cache.storage_backend")?;
        }
        if let Some(value) = env_value("CACHE_EVICTION_STRATEGY") {
            self.cache.eviction_strategy = parse_enum_value(&value, "cache.eviction_strategy")?;
        }

        override_parse(
            "ESCALATION_SESSION_DEFAULT_DURATION_MINUTES",
            &mut self.escalation.session_default_duration_minutes,
        )?;
        override_bool(
            "ESCALATION_INLINE_HINTS_ENABLED",
            &mut self.escalation.inline_hints_enabled,
        )?;

        override_parse("LEDGER_RETENTION_DAYS", &mut self.ledger.retention_days)?;
        if let Some(value) = env_value("LEDGER_STORAGE_PATH") {
            self.ledger.storage_path = value;
        }

        for tier in ModelTier::ALL {
            let tier_key = tier.to_string().to_uppercase();
            let pricing = self.models.get_mut(tier);
            override_parse(
                &format!("MODELS_{}_INPUT_PRICE_PER_1M", tier_key),
                &mut pricing.input_cost_per_1m,
            )?;
            override_parse(
                &format!("MODELS_{}_OUTPUT_PRICE_PER_1M", tier_key),
                &mut pricing.output_cost_per_1m,
            )?;
            override_parse(
                &format!("MODELS_{}_CONTEXT_WINDOW", tier_key),
                &mut pricing.context_window,
            )?;
            override_parse(
                &format!("MODELS_{}_MAX_OUTPUT_TOKENS", tier_key),
                &mut pricing.max_output_tokens,
            )?;
        }

        Ok(())
    }

    /// Validate configured values.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;

        if self.escalation.session_default_duration_minutes <= 0 {
            return Err(Error::Config(
                "session_default_duration_minutes must be positive".to_string(),
            ));
        }
        if self.ledger.retention_days == 0 {
            return Err(Error::Config(
                "retention_days must be positive".to_string(),
            ));
        }
        for pricing in self.models.entries() {
            if pricing.input_cost_per_1m < 0.0 || pricing.output_cost_per_1m < 0.0 {
                return Err(Error::Config(format!(
                    "negative pricing for {} tier",
                    pricing.tier
                )));
            }
        }

        // The rule stack must be constructible as configured
        self.routing.build_stack()?;
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key)).ok()
}

fn override_parse<T>(key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_value(key) {
        *target = value.parse().map_err(|e| {
            Error::Config(format!("invalid {}{}: {}", ENV_PREFIX, key, e))
        })?;
        debug!(key, value, "applied environment override");
    }
    Ok(())
}

fn override_bool(key: &str, target: &mut bool) -> Result<()> {
    if let Some(value) = env_value(key) {
        *target = match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                return Err(Error::Config(format!(
                    "invalid {}{}: expected boolean, got '{}'",
                    ENV_PREFIX, key, other
                )))
            }
        };
        debug!(key, value, "applied environment override");
    }
    Ok(())
}

fn parse_enum_value<T: serde::de::DeserializeOwned>(value: &str, option: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase()))
        .map_err(|_| Error::Config(format!("invalid value '{}' for {}", value, option)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StorageBackend;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.routing.default_model, ModelTier::Medium);
        assert_eq!(settings.cache.max_entries, 10_000);
        assert_eq!(settings.escalation.session_default_duration_minutes, 30);
    }

    #[test]
    fn test_default_stack_builds_all_rules() {
        let settings = Settings::default();
        let stack = settings.routing.build_stack().unwrap();
        assert_eq!(stack.len(), 3);
        assert_eq!(
            stack.rule_names(),
            vec!["task_type", "complexity_based", "length_based"]
        );
    }

    #[test]
    fn test_rule_parameters_applied() {
        let mut settings = Settings::default();
        settings.routing.rules[0].parameters = serde_json::json!({
            "small_threshold": 100,
            "medium_threshold": 300,
        });

        let stack = settings.routing.build_stack().unwrap();
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut settings = Settings::default();
        settings.routing.rules[0].parameters = serde_json::json!({
            "small_threshold": 2000,
            "medium_threshold": 500,
        });
        assert!(settings.routing.build_stack().is_err());
    }

    #[test]
    fn test_unknown_rule_rejected() {
        let mut settings = Settings::default();
        settings.routing.rules.push(RuleSettings {
            name: "made_up".to_string(),
            enabled: true,
            priority: 5,
            parameters: serde_json::Value::Null,
        });
        assert!(matches!(
            settings.routing.build_stack(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_task_mapping_parameters() {
        let mut settings = Settings::default();
        settings.routing.rules[2].parameters = serde_json::json!({
            "task_mappings": { "summarize_docs": "medium" }
        });
        assert!(settings.routing.build_stack().is_ok());

        settings.routing.rules[2].parameters = serde_json::json!({
            "task_mappings": { "summarize_docs": "gigantic" }
        });
        assert!(settings.routing.build_stack().is_err());
    }

    // Environment mutation is process-global; serialise the tests that do it
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("SIGNAL_HUB_CACHE_MAX_ENTRIES", "5000");
        std::env::set_var("SIGNAL_HUB_CACHE_STORAGE_BACKEND", "persistent");
        std::env::set_var("SIGNAL_HUB_ROUTING_DEFAULT_MODEL", "large");
        std::env::set_var("SIGNAL_HUB_ESCALATION_INLINE_HINTS_ENABLED", "0");
        std::env::set_var("SIGNAL_HUB_MODELS_SMALL_INPUT_PRICE_PER_1M", "0.5");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.cache.max_entries, 5000);
        assert_eq!(settings.cache.storage_backend, StorageBackend::Persistent);
        assert_eq!(settings.routing.default_model, ModelTier::Large);
        assert!(!settings.escalation.inline_hints_enabled);
        assert!(
            (settings.models.get(ModelTier::Small).input_cost_per_1m - 0.5).abs() < 1e-9
        );

        for key in [
            "SIGNAL_HUB_CACHE_MAX_ENTRIES",
            "SIGNAL_HUB_CACHE_STORAGE_BACKEND",
            "SIGNAL_HUB_ROUTING_DEFAULT_MODEL",
            "SIGNAL_HUB_ESCALATION_INLINE_HINTS_ENABLED",
            "SIGNAL_HUB_MODELS_SMALL_INPUT_PRICE_PER_1M",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_invalid_env_value_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("SIGNAL_HUB_CACHE_TTL_HOURS", "soon");
        let result = Settings::from_env();
        std::env::remove_var("SIGNAL_HUB_CACHE_TTL_HOURS");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
