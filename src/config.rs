//! Configuration for the validation layer
//!
//! Script resource limits, transaction acceptance policy and difficulty
//! retargeting parameters. Every field has a default, so a config file only
//! needs to name the values it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::keys::Network;

/// Resource limits enforced by the script interpreter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLimits {
    /// Maximum size of a combined script in bytes
    #[serde(default = "default_max_script_size")]
    pub max_script_size: usize,

    /// Maximum size of a single pushed element in bytes
    #[serde(default = "default_max_element_size")]
    pub max_element_size: usize,

    /// Maximum number of elements on the main and alternate stacks combined
    #[serde(default = "default_max_stack_size")]
    pub max_stack_size: usize,

    /// Maximum number of non-push opcodes executed
    #[serde(default = "default_max_ops")]
    pub max_ops: usize,

    /// Maximum key count accepted by CHECKMULTISIG
    #[serde(default = "default_max_pubkeys_per_multisig")]
    pub max_pubkeys_per_multisig: usize,
}

fn default_max_script_size() -> usize {
    10_000
}

fn default_max_element_size() -> usize {
    520
}

fn default_max_stack_size() -> usize {
    1_000
}

fn default_max_ops() -> usize {
    201
}

fn default_max_pubkeys_per_multisig() -> usize {
    20
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_script_size: default_max_script_size(),
            max_element_size: default_max_element_size(),
            max_stack_size: default_max_stack_size(),
            max_ops: default_max_ops(),
            max_pubkeys_per_multisig: default_max_pubkeys_per_multisig(),
        }
    }
}

/// Transaction acceptance policy applied by the verifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyPolicy {
    /// Reject transactions whose outputs spend more than their inputs supply.
    /// Only applies when every input's previous amount is known.
    #[serde(default = "default_true")]
    pub check_value_conservation: bool,

    /// Treat a missing previous amount as a failure instead of skipping the value check
    #[serde(default)]
    pub require_prev_amounts: bool,

    /// Transaction versions the verifier accepts
    #[serde(default = "default_accepted_versions")]
    pub accepted_versions: Vec<u32>,
}

fn default_true() -> bool {
    true
}

fn default_accepted_versions() -> Vec<u32> {
    vec![1, 2]
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            check_value_conservation: true,
            require_prev_amounts: false,
            accepted_versions: default_accepted_versions(),
        }
    }
}

/// Difficulty retargeting parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetargetParams {
    /// Blocks between retargets
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Expected wall-clock duration of one interval in seconds
    #[serde(default = "default_target_timespan_secs")]
    pub target_timespan_secs: u64,

    /// The observed timespan is clamped to [expected / f, expected * f]
    #[serde(default = "default_max_adjustment_factor")]
    pub max_adjustment_factor: u64,

    /// Easiest permitted target, in compact form (0x1d00ffff)
    #[serde(default = "default_pow_limit_bits")]
    pub pow_limit_bits: u32,
}

fn default_interval() -> u64 {
    144
}

fn default_target_timespan_secs() -> u64 {
    86_400
}

fn default_max_adjustment_factor() -> u64 {
    4
}

fn default_pow_limit_bits() -> u32 {
    0x1d00_ffff
}

impl Default for RetargetParams {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            target_timespan_secs: default_target_timespan_secs(),
            max_adjustment_factor: default_max_adjustment_factor(),
            pow_limit_bits: default_pow_limit_bits(),
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: Network,

    #[serde(default)]
    pub script: ScriptLimits,

    #[serde(default)]
    pub verify: VerifyPolicy,

    #[serde(default)]
    pub retarget: RetargetParams,
}

impl Config {
    /// Parse a JSON document, filling omitted fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values that would make validation meaningless
    pub fn validate(&self) -> Result<()> {
        if self.script.max_stack_size == 0 || self.script.max_script_size == 0 {
            return Err(LedgerError::Config(
                "script size and stack limits must be positive".into(),
            ));
        }
        if self.verify.accepted_versions.is_empty() {
            return Err(LedgerError::Config("no transaction versions accepted".into()));
        }
        if self.retarget.interval == 0
            || self.retarget.target_timespan_secs == 0
            || self.retarget.max_adjustment_factor == 0
        {
            return Err(LedgerError::Config(
                "retarget interval, timespan and adjustment factor must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network, Network::Main);
        assert_eq!(config.script.max_element_size, 520);
        assert_eq!(config.script.max_ops, 201);
        assert_eq!(config.verify.accepted_versions, vec![1, 2]);
        assert_eq!(config.retarget.interval, 144);
        assert_eq!(config.retarget.pow_limit_bits, 0x1d00ffff);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = Config::from_json_str(
            r#"{ "network": "test", "script": { "max_ops": 50 }, "verify": { "require_prev_amounts": true } }"#,
        )
        .unwrap();
        assert_eq!(config.network, Network::Test);
        assert_eq!(config.script.max_ops, 50);
        assert_eq!(config.script.max_stack_size, 1_000);
        assert!(config.verify.require_prev_amounts);
        assert!(config.verify.check_value_conservation);
        assert_eq!(config.retarget, RetargetParams::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(Config::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            Config::from_json_str(r#"{ "verify": { "accepted_versions": [] } }"#),
            Err(LedgerError::Config(_))
        ));
        assert!(matches!(
            Config::from_json_str(r#"{ "retarget": { "interval": 0 } }"#),
            Err(LedgerError::Config(_))
        ));
        assert!(matches!(
            Config::from_json_str(r#"{ "network": "regtest" }"#),
            Err(LedgerError::Json(_))
        ));
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/ledger.json"),
            Err(LedgerError::Io(_))
        ));
    }
}
