//! Optional user configuration (spec §6): call-graph hints for unresolvable
//! branches, and exception/interrupt enablement + priority for the
//! entrypoint aggregator.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::effects::CallOverrides;
use crate::error::{Error, Result};
use crate::model::Address;

const SUPPORTED_VERSION: u32 = 1;
const PRIORITY_GROUPS: u8 = 4;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stack_depth_analyzer_version: u32,
    #[serde(default)]
    pub functions: FunctionsConfig,
    #[serde(default)]
    pub entrypoints: EntrypointsConfig,
}

impl Config {
    pub fn parse(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        if config.stack_depth_analyzer_version != SUPPORTED_VERSION {
            return Err(Error::Config(format!(
                "unsupported config version {} (expected {SUPPORTED_VERSION})",
                config.stack_depth_analyzer_version
            )));
        }
        config.functions.instructions_effect.call_overrides.validate()?;
        config.entrypoints.interrupts.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self { stack_depth_analyzer_version: SUPPORTED_VERSION, functions: FunctionsConfig::default(), entrypoints: EntrypointsConfig::default() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionsConfig {
    #[serde(default)]
    pub instructions_effect: InstructionsEffectConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstructionsEffectConfig {
    #[serde(default)]
    pub call_overrides: CallOverridesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct CallOverridesConfig(Vec<CallOverrideEntry>);

#[derive(Debug, Clone, Deserialize)]
pub struct CallOverrideEntry {
    pub source: Address,
    pub targets: BTreeSet<Address>,
}

impl CallOverridesConfig {
    fn validate(&self) -> Result<()> {
        let mut sources = BTreeSet::new();
        for entry in &self.0 {
            if entry.source % 2 != 0 {
                return Err(Error::Config(format!("call override source {:#x} must be aligned", entry.source)));
            }
            if entry.targets.is_empty() {
                return Err(Error::Config(format!("call override at {:#x} has no targets", entry.source)));
            }
            if entry.targets.iter().any(|t| t % 2 != 0) {
                return Err(Error::Config(format!("call override targets at {:#x} must be aligned", entry.source)));
            }
            if !sources.insert(entry.source) {
                return Err(Error::Config(format!("duplicate call override source {:#x}", entry.source)));
            }
        }
        Ok(())
    }

    pub fn as_call_overrides(&self) -> CallOverrides {
        self.0.iter().map(|entry| (entry.source, entry.targets.clone())).collect()
    }
}

/// `true` (enabled with fallback details), `false` (disabled), `null`
/// (autodetect against the default handler), or an explicit object for
/// exceptions/interrupts that carry a priority group.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(untagged)]
pub enum Tristate<T> {
    #[default]
    Autodetect,
    Bool(bool),
    Detailed(T),
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PriorityGroupDetail {
    pub priority_group: Option<u8>,
}

pub type ExceptionOptionalConfig = Tristate<()>;
pub type ExceptionConfigurableConfig = Tristate<PriorityGroupDetail>;

/// `true` (autodetect, the default), `false` (feature disabled), a numeric
/// address, or a function name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DefaultHandlerConfig {
    Bool(bool),
    Address(Address),
    Name(String),
}

impl Default for DefaultHandlerConfig {
    fn default() -> Self {
        Self::Bool(true)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntrypointsConfig {
    #[serde(default)]
    pub default_handler: DefaultHandlerConfig,
    #[serde(default)]
    pub nmi: ExceptionOptionalConfig,
    #[serde(default)]
    pub svcall: ExceptionConfigurableConfig,
    #[serde(default)]
    pub pendsv: ExceptionConfigurableConfig,
    #[serde(default)]
    pub systick: ExceptionConfigurableConfig,
    #[serde(default)]
    pub interrupts: InterruptsConfig,
}

impl Default for EntrypointsConfig {
    fn default() -> Self {
        Self {
            default_handler: DefaultHandlerConfig::default(),
            nmi: Tristate::Autodetect,
            svcall: Tristate::Autodetect,
            pendsv: Tristate::Autodetect,
            systick: Tristate::Autodetect,
            interrupts: InterruptsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptConfigEntry {
    pub number: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: ExceptionConfigurableConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct InterruptsConfig(Vec<InterruptConfigEntry>);

impl InterruptsConfig {
    fn validate(&self) -> Result<()> {
        let mut numbers = BTreeSet::new();
        for interrupt in &self.0 {
            if interrupt.number >= 32 {
                return Err(Error::Config(format!("interrupt number {} out of range [0, 32)", interrupt.number)));
            }
            if let ExceptionConfigurableConfig::Detailed(PriorityGroupDetail { priority_group: Some(group) }) = interrupt.config {
                if group >= PRIORITY_GROUPS {
                    return Err(Error::Config(format!("interrupt #{} priority group {group} out of range [0, {PRIORITY_GROUPS})", interrupt.number)));
                }
            }
            if !numbers.insert(interrupt.number) {
                return Err(Error::Config(format!("duplicate interrupt number {}", interrupt.number)));
            }
        }
        Ok(())
    }

    pub fn by_number(&self) -> BTreeMap<u8, &InterruptConfigEntry> {
        self.0.iter().map(|i| (i.number, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = Config::parse(r#"{"stack_depth_analyzer_version": 1}"#).unwrap();
        assert!(matches!(config.entrypoints.default_handler, DefaultHandlerConfig::Bool(true)));
    }

    #[test]
    fn wrong_version_is_rejected() {
        assert!(Config::parse(r#"{"stack_depth_analyzer_version": 2}"#).is_err());
    }

    #[test]
    fn call_overrides_round_trip() {
        let json = r#"{
            "stack_depth_analyzer_version": 1,
            "functions": {"instructions_effect": {"call_overrides": [
                {"source": 256, "targets": [512, 768]}
            ]}}
        }"#;
        let config = Config::parse(json).unwrap();
        let overrides = config.functions.instructions_effect.call_overrides.as_call_overrides();
        assert_eq!(overrides.get(&256), Some(&BTreeSet::from([512, 768])));
    }

    #[test]
    fn duplicate_interrupt_numbers_are_rejected() {
        let json = r#"{
            "stack_depth_analyzer_version": 1,
            "entrypoints": {"interrupts": [{"number": 3}, {"number": 3}]}
        }"#;
        assert!(Config::parse(json).is_err());
    }
}
