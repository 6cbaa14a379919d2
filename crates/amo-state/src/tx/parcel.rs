use amo_types::{Address, Currency, Extra, HexBytes, Parcel, Request, Tx, TxCode, Usage};
use serde::Deserialize;
use serde_json::Value;

use super::{CheckResult, ExecuteResult, TxContext, TxEvent, abort, done, ok, parse_payload};
use crate::store::Store;

#[derive(Deserialize)]
struct RegisterParam {
    target: HexBytes,
    custody: HexBytes,
    #[serde(default)]
    proxy_account: Option<Address>,
    #[serde(default)]
    extra: Option<Value>,
}

#[derive(Deserialize)]
struct DiscardParam {
    target: HexBytes,
}

#[derive(Deserialize)]
struct RequestParam {
    target: HexBytes,
    payment: Currency,
    #[serde(default)]
    dealer: Option<Address>,
    #[serde(default)]
    dealer_fee: Currency,
    #[serde(default)]
    extra: Option<Value>,
}

#[derive(Deserialize)]
struct CancelParam {
    target: HexBytes,
}

#[derive(Deserialize)]
struct GrantParam {
    target: HexBytes,
    grantee: Address,
    custody: HexBytes,
    #[serde(default)]
    extra: Option<Value>,
}

#[derive(Deserialize)]
struct RevokeParam {
    target: HexBytes,
    grantee: Address,
}

// The sender may act on a parcel as its owner or its proxy account.
fn controls(parcel: &Parcel, sender: &Address) -> bool {
    parcel.owner == *sender || parcel.proxy_account.as_ref() == Some(sender)
}

pub fn check_register(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<RegisterParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

pub fn execute_register(_ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: RegisterParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    if store.get_parcel(param.target.as_slice(), false).is_some() {
        return abort(TxCode::AlreadyRegistered);
    }
    store.set_parcel(
        param.target.as_slice(),
        &Parcel {
            owner: tx.sender,
            custody: param.custody,
            proxy_account: param.proxy_account,
            extra: Extra {
                register: param.extra,
                ..Extra::default()
            },
        },
    );
    done(vec![TxEvent::parcel(&param.target)])
}

pub fn check_discard(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<DiscardParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

pub fn execute_discard(_ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: DiscardParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    let Some(parcel) = store.get_parcel(param.target.as_slice(), false) else {
        return abort(TxCode::ParcelNotFound);
    };
    if parcel.owner != tx.sender {
        return abort(TxCode::PermissionDenied);
    }
    store.delete_parcel(param.target.as_slice());
    done(vec![TxEvent::parcel(&param.target)])
}

pub fn check_request(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<RequestParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

/// Escrow a purchase offer for a parcel: payment plus any dealer fee leaves
/// the buyer's balance and waits in the request record.
pub fn execute_request(_ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let mut param: RequestParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    let Some(parcel) = store.get_parcel(param.target.as_slice(), false) else {
        return abort(TxCode::ParcelNotFound);
    };
    if parcel.owner == tx.sender {
        return abort(TxCode::SelfTransaction);
    }
    if store.get_usage(&tx.sender, param.target.as_slice(), false).is_some() {
        return abort(TxCode::AlreadyGranted);
    }
    if store.get_request(&tx.sender, param.target.as_slice(), false).is_some() {
        return abort(TxCode::AlreadyRequested);
    }
    if param.dealer.is_none() {
        param.dealer_fee = Currency::zero();
    }

    let wanted = &param.payment + &param.dealer_fee;
    let balance = store.get_balance(&tx.sender, false);
    let Some(balance) = balance.checked_sub(&wanted) else {
        return abort(TxCode::NotEnoughBalance);
    };
    store.set_request(
        &tx.sender,
        param.target.as_slice(),
        &Request {
            payment: param.payment,
            dealer: param.dealer,
            dealer_fee: param.dealer_fee,
            extra: Extra {
                register: parcel.extra.register,
                request: param.extra,
                ..Extra::default()
            },
        },
    );
    store.set_balance(&tx.sender, &balance);
    done(vec![TxEvent::parcel(&param.target)])
}

pub fn check_cancel(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<CancelParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

pub fn execute_cancel(_ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: CancelParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    let Some(request) = store.get_request(&tx.sender, param.target.as_slice(), false) else {
        return abort(TxCode::RequestNotFound);
    };
    store.delete_request(&tx.sender, param.target.as_slice());
    let refund = &request.payment + &request.dealer_fee;
    let balance = store.get_balance(&tx.sender, false);
    store.set_balance(&tx.sender, &(&balance + &refund));
    done(vec![TxEvent::parcel(&param.target)])
}

pub fn check_grant(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<GrantParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

/// Accept a request: the escrowed payment goes to the parcel owner, the
/// dealer fee to the dealer, and the grantee receives a usage record.
pub fn execute_grant(_ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: GrantParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    let Some(parcel) = store.get_parcel(param.target.as_slice(), false) else {
        return abort(TxCode::ParcelNotFound);
    };
    if !controls(&parcel, &tx.sender) {
        return abort(TxCode::PermissionDenied);
    }
    if store.get_usage(&param.grantee, param.target.as_slice(), false).is_some() {
        return abort(TxCode::AlreadyGranted);
    }
    let Some(request) = store.get_request(&param.grantee, param.target.as_slice(), false) else {
        return abort(TxCode::RequestNotFound);
    };

    store.delete_request(&param.grantee, param.target.as_slice());
    let owner_balance = store.get_balance(&parcel.owner, false);
    store.set_balance(&parcel.owner, &(&owner_balance + &request.payment));
    if let Some(dealer) = &request.dealer {
        let dealer_balance = store.get_balance(dealer, false);
        store.set_balance(dealer, &(&dealer_balance + &request.dealer_fee));
    }
    store.set_usage(
        &param.grantee,
        param.target.as_slice(),
        &Usage {
            custody: param.custody,
            extra: Extra {
                register: request.extra.register,
                request: request.extra.request,
                grant: param.extra,
            },
        },
    );
    done(vec![TxEvent::parcel(&param.target)])
}

pub fn check_revoke(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<RevokeParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

pub fn execute_revoke(_ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: RevokeParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    let Some(parcel) = store.get_parcel(param.target.as_slice(), false) else {
        return abort(TxCode::ParcelNotFound);
    };
    if !controls(&parcel, &tx.sender) {
        return abort(TxCode::PermissionDenied);
    }
    if store.get_usage(&param.grantee, param.target.as_slice(), false).is_none() {
        return abort(TxCode::UsageNotFound);
    }
    store.delete_usage(&param.grantee, param.target.as_slice());
    done(vec![TxEvent::parcel(&param.target)])
}
