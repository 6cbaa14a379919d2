//! Query handlers. All reads go against the last committed Merkle version —
//! a concurrent Query never observes the working tree.

use amo_types::{Address, Currency, HexBytes, ParcelEx, QueryCode};
use serde::{Deserialize, Serialize};

use crate::app::App;

pub struct QueryResponse {
    pub code: QueryCode,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub log: String,
}

impl QueryResponse {
    fn ok<T: Serialize>(data: &[u8], value: &T) -> QueryResponse {
        QueryResponse {
            code: QueryCode::Ok,
            key: data.to_vec(),
            value: serde_json::to_vec(value).expect("query values serialize infallibly"),
            log: "ok".to_string(),
        }
    }

    fn error(code: QueryCode, data: &[u8], log: &str) -> QueryResponse {
        QueryResponse {
            code,
            key: data.to_vec(),
            value: Vec::new(),
            log: log.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct BuyerTarget {
    buyer: Address,
    target: HexBytes,
}

#[derive(Deserialize)]
struct AddressHeight {
    address: Address,
    height: u64,
}

#[derive(Serialize)]
struct AddressAmount {
    address: Address,
    amount: Currency,
}

#[derive(Serialize)]
struct HeightAmount {
    height: u64,
    amount: Currency,
}

pub fn handle(app: &App, path: &str, data: &[u8]) -> QueryResponse {
    let response = match path {
        "/config" => QueryResponse::ok(data, app.config()),
        "/balance" => query_balance(app, data),
        "/stake" => query_stake(app, data),
        "/delegate" => query_delegate(app, data),
        "/validator" => query_validator(app, data),
        "/parcel" => query_parcel(app, data),
        "/request" => query_request(app, data),
        "/usage" => query_usage(app, data),
        "/inc_block" => query_block_incentives(app, data),
        "/inc_address" => query_address_incentives(app, data),
        "/inc" => query_incentive(app, data),
        _ => QueryResponse::error(QueryCode::BadPath, data, "no such query path"),
    };
    debug!(path, code = ?response.code, "query");
    response
}

fn parse<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T, QueryResponse> {
    if data.is_empty() {
        return Err(QueryResponse::error(QueryCode::NoKey, data, "no query key"));
    }
    serde_json::from_slice(data)
        .map_err(|_| QueryResponse::error(QueryCode::BadKey, data, "unparseable query key"))
}

fn query_balance(app: &App, data: &[u8]) -> QueryResponse {
    match parse::<Address>(data) {
        Ok(addr) => QueryResponse::ok(data, &app.store().get_balance(&addr, true)),
        Err(response) => response,
    }
}

fn query_stake(app: &App, data: &[u8]) -> QueryResponse {
    let addr = match parse::<Address>(data) {
        Ok(addr) => addr,
        Err(response) => return response,
    };
    match app.store().get_stake(&addr, true) {
        Some(stake) => QueryResponse::ok(data, &stake),
        None => QueryResponse::error(QueryCode::NoMatch, data, "no stake"),
    }
}

fn query_delegate(app: &App, data: &[u8]) -> QueryResponse {
    let addr = match parse::<Address>(data) {
        Ok(addr) => addr,
        Err(response) => return response,
    };
    match app.store().get_delegate(&addr, true) {
        Some(delegate) => QueryResponse::ok(data, &delegate),
        None => QueryResponse::error(QueryCode::NoMatch, data, "no delegate"),
    }
}

// Resolves a validator address to its stake holder.
fn query_validator(app: &App, data: &[u8]) -> QueryResponse {
    let addr = match parse::<Address>(data) {
        Ok(addr) => addr,
        Err(response) => return response,
    };
    match app.store().get_holder_by_validator(&addr) {
        Some(holder) => QueryResponse::ok(data, &holder),
        None => QueryResponse::error(QueryCode::NoMatch, data, "no such validator"),
    }
}

fn query_parcel(app: &App, data: &[u8]) -> QueryResponse {
    let id = match parse::<HexBytes>(data) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match app.store().get_parcel(id.as_slice(), true) {
        Some(parcel) => QueryResponse::ok(
            data,
            &ParcelEx {
                parcel,
                requests: app.store().get_requests(id.as_slice(), true),
                usages: app.store().get_usages(id.as_slice(), true),
            },
        ),
        None => QueryResponse::error(QueryCode::NoMatch, data, "no such parcel"),
    }
}

fn query_request(app: &App, data: &[u8]) -> QueryResponse {
    let param = match parse::<BuyerTarget>(data) {
        Ok(param) => param,
        Err(response) => return response,
    };
    match app.store().get_request(&param.buyer, param.target.as_slice(), true) {
        Some(request) => QueryResponse::ok(data, &request),
        None => QueryResponse::error(QueryCode::NoMatch, data, "no such request"),
    }
}

fn query_usage(app: &App, data: &[u8]) -> QueryResponse {
    let param = match parse::<BuyerTarget>(data) {
        Ok(param) => param,
        Err(response) => return response,
    };
    match app.store().get_usage(&param.buyer, param.target.as_slice(), true) {
        Some(usage) => QueryResponse::ok(data, &usage),
        None => QueryResponse::error(QueryCode::NoMatch, data, "no such usage"),
    }
}

fn query_block_incentives(app: &App, data: &[u8]) -> QueryResponse {
    let height = match parse::<u64>(data) {
        Ok(height) => height,
        Err(response) => return response,
    };
    let incentives: Vec<AddressAmount> = app
        .store()
        .block_incentives(height)
        .into_iter()
        .map(|(address, amount)| AddressAmount { address, amount })
        .collect();
    QueryResponse::ok(data, &incentives)
}

fn query_address_incentives(app: &App, data: &[u8]) -> QueryResponse {
    let addr = match parse::<Address>(data) {
        Ok(addr) => addr,
        Err(response) => return response,
    };
    let incentives: Vec<HeightAmount> = app
        .store()
        .address_incentives(&addr)
        .into_iter()
        .map(|(height, amount)| HeightAmount { height, amount })
        .collect();
    QueryResponse::ok(data, &incentives)
}

fn query_incentive(app: &App, data: &[u8]) -> QueryResponse {
    let param = match parse::<AddressHeight>(data) {
        Ok(param) => param,
        Err(response) => return response,
    };
    match app.store().get_incentive(param.height, &param.address) {
        Some(amount) => QueryResponse::ok(data, &amount),
        None => QueryResponse::error(QueryCode::NoMatch, data, "no incentive record"),
    }
}
