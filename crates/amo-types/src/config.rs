use serde::{Deserialize, Serialize};

use crate::Currency;

/// On-chain application config. Stored as a JSON blob in the Merkle tree and
/// reloaded on every Commit; drafts carry a candidate replacement. Fields
/// missing from the stored blob fall back to the protocol defaults, so a
/// partial patch overlays cleanly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub max_validators: u64,
    pub weight_validator: u64,
    pub weight_delegator: u64,
    pub min_staking_unit: Currency,
    pub blk_reward: Currency,
    pub tx_reward: Currency,
    pub penalty_ratio_m: f64,
    pub penalty_ratio_l: f64,
    pub laziness_counter_window: u64,
    pub laziness_threshold: f64,
    pub block_bound_tx_grace_period: u64,
    pub lockup_period: u64,
    pub draft_open_count: u64,
    pub draft_close_count: u64,
    pub draft_apply_count: u64,
    pub draft_deposit: Currency,
    pub draft_quorum_rate: f64,
    pub draft_pass_rate: f64,
    pub draft_refund_rate: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            max_validators: 100,
            weight_validator: 2,
            weight_delegator: 1,
            min_staking_unit: "1000000000000000000000000".parse().expect("valid decimal"),
            blk_reward: Currency::zero(),
            tx_reward: "10000000000000000000".parse().expect("valid decimal"),
            penalty_ratio_m: 0.3,
            penalty_ratio_l: 0.3,
            laziness_counter_window: 10_000,
            laziness_threshold: 0.8,
            block_bound_tx_grace_period: 10_000,
            lockup_period: 1_000_000,
            draft_open_count: 10_000,
            draft_close_count: 10_000,
            draft_apply_count: 10_000,
            draft_deposit: "1000000000000000000000000".parse().expect("valid decimal"),
            draft_quorum_rate: 0.3,
            draft_pass_rate: 0.51,
            draft_refund_rate: 0.2,
        }
    }
}
