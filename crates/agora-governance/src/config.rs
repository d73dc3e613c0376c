//! Deployment configuration.
//!
//! Loaded from TOML. Every field has a default, so a config file only needs
//! to name what differs.

use std::path::Path;

use agora_types::{Address, Amount};
use serde::{Deserialize, Serialize};

use crate::engine::{GovernanceSettings, QUORUM_DENOMINATOR};
use crate::error::{GovernanceError, Result};
use crate::proposal::QuorumCounting;
use crate::timelock::{MAXIMUM_DELAY, MINIMUM_DELAY};

/// Governance deployment parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Governance name, also the typed-data signing domain name
    pub name: String,
    /// Name of the primary token's ledger, its delegation signing domain
    pub token_name: String,
    pub chain_id: u64,
    /// Blocks
    pub voting_delay: u64,
    /// Blocks
    pub voting_period: u64,
    #[serde(with = "amount")]
    pub proposal_threshold: Amount,
    /// Percent, over a denominator of 100
    pub quorum_numerator: u64,
    pub quorum_counting: QuorumCounting,
    pub guardian: Address,
    /// Seconds
    pub timelock_delay: u64,
    pub primary_token: Address,
    pub supported_tokens: Vec<Address>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            name: "Agora Governance".to_string(),
            token_name: "Agora".to_string(),
            chain_id: 1,
            voting_delay: 1,
            voting_period: 17_280,
            proposal_threshold: 400_000,
            quorum_numerator: 4,
            quorum_counting: QuorumCounting::ForOnly,
            guardian: Address::from_label("guardian"),
            timelock_delay: MINIMUM_DELAY,
            primary_token: Address::from_label("token"),
            supported_tokens: Vec::new(),
        }
    }
}

impl GovernanceConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: GovernanceConfig =
            toml::from_str(contents).map_err(|e| GovernanceError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file.
    /// Paths containing `..` are rejected.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.to_string_lossy().contains("..") {
            anyhow::bail!("Invalid path: directory traversal detected");
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to load config file '{}': {}", path.display(), e))?;
        tracing::info!(path = %path.display(), name = %config.name, "Governance config loaded");
        Ok(config)
    }

    /// Save configuration to file.
    /// Paths containing `..` are rejected.
    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if path.to_string_lossy().contains("..") {
            anyhow::bail!("Invalid path: directory traversal detected");
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| anyhow::anyhow!("Failed to write config file '{}': {}", path.display(), e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.voting_period == 0 {
            return Err(GovernanceError::InvalidConfig("voting period cannot be 0".into()));
        }
        if self.quorum_numerator > QUORUM_DENOMINATOR {
            return Err(GovernanceError::InvalidConfig(format!(
                "quorum numerator {} exceeds {}",
                self.quorum_numerator, QUORUM_DENOMINATOR
            )));
        }
        if !(MINIMUM_DELAY..=MAXIMUM_DELAY).contains(&self.timelock_delay) {
            return Err(GovernanceError::InvalidConfig(format!(
                "timelock delay {} outside [{}, {}]",
                self.timelock_delay, MINIMUM_DELAY, MAXIMUM_DELAY
            )));
        }
        if self.primary_token.is_zero() {
            return Err(GovernanceError::InvalidConfig("primary token cannot be zero".into()));
        }
        for (i, token) in self.supported_tokens.iter().enumerate() {
            if token.is_zero() || *token == self.primary_token {
                return Err(GovernanceError::InvalidConfig(format!(
                    "invalid supported token {}",
                    token
                )));
            }
            if self.supported_tokens[..i].contains(token) {
                return Err(GovernanceError::InvalidConfig(format!(
                    "duplicate supported token {}",
                    token
                )));
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> GovernanceSettings {
        GovernanceSettings {
            voting_delay: self.voting_delay,
            voting_period: self.voting_period,
            proposal_threshold: self.proposal_threshold,
            quorum_numerator: self.quorum_numerator,
            quorum_counting: self.quorum_counting,
        }
    }
}

/// TOML integers are 64-bit, so amounts are written as decimal strings and
/// read from either form.
mod amount {
    use agora_types::Amount;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u64),
        Str(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Int(v) => Ok(Amount::from(v)),
            Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
