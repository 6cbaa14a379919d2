//! The records stored under the Merkle tree's prefix-delimited namespaces.
//! All of them round-trip through canonical JSON: struct field order is the
//! serialization order, byte strings are lowercase hex, amounts are decimal
//! strings, and absent options are omitted entirely.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Address, AppConfig, Currency, HexBytes, PubKey};

/// One stake record, unlocked or locked. A holder's unlocked record and all
/// its locked records designate the same validator key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stake {
    pub amount: Currency,
    pub validator: PubKey,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delegate {
    pub delegatee: Address,
    pub amount: Currency,
}

/// A delegate joined with the delegator address it is keyed under.
#[derive(Clone, Debug, PartialEq)]
pub struct DelegateEx {
    pub delegator: Address,
    pub delegate: Delegate,
}

/// A governance proposal. The three phase counters tick down one per block in
/// the order open → close → apply; tallies are frozen when close reaches zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub proposer: Address,
    pub config: AppConfig,
    pub deposit: Currency,
    pub open_count: u64,
    pub close_count: u64,
    pub apply_count: u64,
    pub tally_quorum: Currency,
    pub tally_approve: Currency,
    pub tally_reject: Currency,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub approve: bool,
    pub power: Currency,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoteInfo {
    pub voter: Address,
    pub vote: Vote,
}

/// Free-form metadata captured at each step of a parcel's life.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Extra {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub register: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub grant: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub owner: Address,
    pub custody: HexBytes,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub proxy_account: Option<Address>,
    #[serde(default)]
    pub extra: Extra,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParcelEx {
    #[serde(flatten)]
    pub parcel: Parcel,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<RequestEx>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<UsageEx>,
}

/// A pending purchase. The payment (and dealer fee, when a dealer is named)
/// has already been debited from the buyer and is held in escrow here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub payment: Currency,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dealer: Option<Address>,
    #[serde(skip_serializing_if = "Currency::is_zero", default)]
    pub dealer_fee: Currency,
    #[serde(default)]
    pub extra: Extra,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RequestEx {
    #[serde(flatten)]
    pub request: Request,
    pub buyer: Address,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub custody: HexBytes,
    #[serde(default)]
    pub extra: Extra,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UsageEx {
    #[serde(flatten)]
    pub usage: Usage,
    pub buyer: Address,
}
