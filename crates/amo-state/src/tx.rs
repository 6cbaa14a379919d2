//! Transaction dispatch: each command tag maps to a per-op `check` (shape
//! and cheap predicates, no store access) and `execute` (the full state
//! mutation). Execute reports a result code, an info string, and the events
//! to attach to the DeliverTx response; the driver handles fee debit and
//! whole-tx rollback around it.

use amo_types::{AppConfig, Tx, TxCode};

use crate::store::Store;

mod draft;
mod parcel;
mod staking;
mod transfer;

pub const TYPE_TRANSFER: &str = "transfer";
pub const TYPE_STAKE: &str = "stake";
pub const TYPE_WITHDRAW: &str = "withdraw";
pub const TYPE_DELEGATE: &str = "delegate";
pub const TYPE_RETRACT: &str = "retract";
pub const TYPE_REGISTER: &str = "register";
pub const TYPE_DISCARD: &str = "discard";
pub const TYPE_REQUEST: &str = "request";
pub const TYPE_CANCEL: &str = "cancel";
pub const TYPE_GRANT: &str = "grant";
pub const TYPE_REVOKE: &str = "revoke";
pub const TYPE_PROPOSE: &str = "propose";
pub const TYPE_VOTE: &str = "vote";

/// Per-block context an operation may consult.
pub struct TxContext<'a> {
    pub config: &'a AppConfig,
    pub next_draft_id: u32,
}

/// An event emitted by a successful operation, attached to the DeliverTx
/// response.
#[derive(Clone, Debug, PartialEq)]
pub struct TxEvent {
    pub kind: String,
    pub attributes: Vec<(String, String)>,
}

impl TxEvent {
    pub fn parcel(id: impl std::fmt::Display) -> TxEvent {
        TxEvent {
            kind: "parcel".to_string(),
            attributes: vec![("id".to_string(), id.to_string())],
        }
    }
}

pub type CheckResult = (TxCode, String);
pub type ExecuteResult = (TxCode, String, Vec<TxEvent>);

pub fn check(ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match tx.kind.as_str() {
        TYPE_TRANSFER => transfer::check(ctx, tx),
        TYPE_STAKE => staking::check_stake(ctx, tx),
        TYPE_WITHDRAW => staking::check_withdraw(ctx, tx),
        TYPE_DELEGATE => staking::check_delegate(ctx, tx),
        TYPE_RETRACT => staking::check_retract(ctx, tx),
        TYPE_REGISTER => parcel::check_register(ctx, tx),
        TYPE_DISCARD => parcel::check_discard(ctx, tx),
        TYPE_REQUEST => parcel::check_request(ctx, tx),
        TYPE_CANCEL => parcel::check_cancel(ctx, tx),
        TYPE_GRANT => parcel::check_grant(ctx, tx),
        TYPE_REVOKE => parcel::check_revoke(ctx, tx),
        TYPE_PROPOSE => draft::check_propose(ctx, tx),
        TYPE_VOTE => draft::check_vote(ctx, tx),
        other => (TxCode::BadParam, format!("unknown tx type: {other}")),
    }
}

pub fn execute(ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    match tx.kind.as_str() {
        TYPE_TRANSFER => transfer::execute(ctx, store, tx),
        TYPE_STAKE => staking::execute_stake(ctx, store, tx),
        TYPE_WITHDRAW => staking::execute_withdraw(ctx, store, tx),
        TYPE_DELEGATE => staking::execute_delegate(ctx, store, tx),
        TYPE_RETRACT => staking::execute_retract(ctx, store, tx),
        TYPE_REGISTER => parcel::execute_register(ctx, store, tx),
        TYPE_DISCARD => parcel::execute_discard(ctx, store, tx),
        TYPE_REQUEST => parcel::execute_request(ctx, store, tx),
        TYPE_CANCEL => parcel::execute_cancel(ctx, store, tx),
        TYPE_GRANT => parcel::execute_grant(ctx, store, tx),
        TYPE_REVOKE => parcel::execute_revoke(ctx, store, tx),
        TYPE_PROPOSE => draft::execute_propose(ctx, store, tx),
        TYPE_VOTE => draft::execute_vote(ctx, store, tx),
        other => (
            TxCode::BadParam,
            format!("unknown tx type: {other}"),
            Vec::new(),
        ),
    }
}

/// Whether a successful tx of this type changes the validator set.
pub fn updates_validators(kind: &str) -> bool {
    matches!(
        kind,
        TYPE_STAKE | TYPE_WITHDRAW | TYPE_DELEGATE | TYPE_RETRACT
    )
}

fn ok() -> CheckResult {
    (TxCode::Ok, "ok".to_string())
}

fn fail(code: TxCode) -> CheckResult {
    (code, code.info().to_string())
}

fn done(events: Vec<TxEvent>) -> ExecuteResult {
    (TxCode::Ok, "ok".to_string(), events)
}

fn abort(code: TxCode) -> ExecuteResult {
    (code, code.info().to_string(), Vec::new())
}

fn parse_payload<T: serde::de::DeserializeOwned>(tx: &Tx) -> Result<T, String> {
    serde_json::from_str(tx.payload.get()).map_err(|e| e.to_string())
}
