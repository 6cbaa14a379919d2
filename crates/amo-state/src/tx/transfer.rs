use amo_types::{Address, Currency, Tx, TxCode};
use serde::Deserialize;

use super::{CheckResult, ExecuteResult, TxContext, abort, done, fail, ok, parse_payload};
use crate::store::Store;

#[derive(Deserialize)]
struct TransferParam {
    #[serde(default)]
    udc: Option<u32>,
    to: Address,
    amount: Currency,
}

pub fn check(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    let param: TransferParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e),
    };
    if param.udc.is_some() {
        return (TxCode::BadParam, "udc transfers are not supported".to_string());
    }
    if param.to == tx.sender {
        return fail(TxCode::SelfTransaction);
    }
    ok()
}

pub fn execute(ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let (code, info) = check(ctx, tx);
    if code != TxCode::Ok {
        return (code, info, Vec::new());
    }
    let param: TransferParam = parse_payload(tx).expect("payload validated by check");

    if param.amount.is_zero() {
        return abort(TxCode::InvalidAmount);
    }
    let from_balance = store.get_balance(&tx.sender, false);
    let Some(from_balance) = from_balance.checked_sub(&param.amount) else {
        return abort(TxCode::NotEnoughBalance);
    };
    let to_balance = store.get_balance(&param.to, false);
    store.set_balance(&tx.sender, &from_balance);
    store.set_balance(&param.to, &(&to_balance + &param.amount));
    done(Vec::new())
}
