use crate::types::{AccountId, Points};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reward step function for the vertical word of a puzzle.
/// Solvers ranked `1..=top_tier_size` get `top_reward`, later solvers `later_reward`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerticalBonusConfig {
    pub top_tier_size: u64,
    pub top_reward: Points,
    pub later_reward: Points,
}

/// Client-side reconciliation timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientTiming {
    /// How long a hint purchase may stay pending without a confirming push.
    pub hint_pending_timeout_ms: u64,
    /// How long an action shows its error before it becomes retryable.
    pub error_revert_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    pub row_reward: Points,
    pub first_hint_cost: Points,
    pub second_hint_cost: Points,
    pub image_cost_per_difficulty: Points,
    pub max_submission_reward: Points,
    pub vertical_bonus: VerticalBonusConfig,
    pub client: ClientTiming,
    /// Bearer token → account id. Stands in for the identity provider.
    #[serde(default)]
    pub tokens: HashMap<String, AccountId>,
}

impl EconomyConfig {
    /// Load from a JSON file. Missing file is an error; use
    /// `EconomyConfig::default()` for the built-in economy.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EconomyConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let amounts = [
            ("row_reward", self.row_reward),
            ("first_hint_cost", self.first_hint_cost),
            ("second_hint_cost", self.second_hint_cost),
            ("image_cost_per_difficulty", self.image_cost_per_difficulty),
            ("max_submission_reward", self.max_submission_reward),
            ("vertical_bonus.top_reward", self.vertical_bonus.top_reward),
            ("vertical_bonus.later_reward", self.vertical_bonus.later_reward),
        ];
        for (name, value) in amounts {
            anyhow::ensure!(value > 0, "{name} must be positive, got {value}");
        }
        anyhow::ensure!(
            self.second_hint_cost >= self.first_hint_cost,
            "second_hint_cost ({}) must not be below first_hint_cost ({})",
            self.second_hint_cost,
            self.first_hint_cost,
        );
        anyhow::ensure!(
            self.client.hint_pending_timeout_ms > 0,
            "client.hint_pending_timeout_ms must be positive"
        );
        Ok(())
    }

    /// Cost of the given hint level (1-based) for a row.
    pub fn hint_cost(&self, level: u8) -> Points {
        if level <= 1 {
            self.first_hint_cost
        } else {
            self.second_hint_cost
        }
    }

    pub fn image_cost(&self, difficulty: u32) -> Points {
        self.image_cost_per_difficulty * Points::from(difficulty)
    }

    /// Config with hardcoded defaults for use in tests.
    pub fn default_test() -> Self {
        let mut tokens = HashMap::new();
        tokens.insert("tok-alice".to_string(), "alice".to_string());
        tokens.insert("tok-bob".to_string(), "bob".to_string());
        tokens.insert("tok-mod".to_string(), "mod".to_string());
        Self { tokens, ..Self::default() }
    }
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            row_reward: 10,
            first_hint_cost: 10,
            second_hint_cost: 20,
            image_cost_per_difficulty: 2,
            max_submission_reward: 100,
            vertical_bonus: VerticalBonusConfig {
                top_tier_size: 3,
                top_reward: 50,
                later_reward: 20,
            },
            client: ClientTiming {
                hint_pending_timeout_ms: 30_000,
                error_revert_ms: 2_500,
            },
            tokens: HashMap::new(),
        }
    }
}
