use serde::{Deserialize, Serialize};

use crate::{Address, AppConfig, Currency, PubKey};

/// The app-state document embedded in the genesis file. Genesis stakes enter
/// as unlocked stakes; a config section overrides the protocol defaults from
/// the first block on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenesisAppState {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub config: Option<AppConfig>,
    #[serde(default)]
    pub balances: Vec<GenesisBalance>,
    #[serde(default)]
    pub stakes: Vec<GenesisStake>,
    #[serde(default)]
    pub delegates: Vec<GenesisDelegate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenesisBalance {
    pub addr: Address,
    pub amount: Currency,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenesisStake {
    pub holder: Address,
    pub validator_pubkey: PubKey,
    pub amount: Currency,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenesisDelegate {
    pub delegator: Address,
    pub delegatee: Address,
    pub amount: Currency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let doc = r#"{"balances":[{"addr":"0101010101010101010101010101010101010101","amount":"100"}]}"#;
        let state: GenesisAppState = serde_json::from_str(doc).expect("parse");
        assert_eq!(state.balances.len(), 1);
        assert!(state.stakes.is_empty());
        assert!(state.delegates.is_empty());
    }
}
