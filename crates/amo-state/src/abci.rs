//! Translation between ABCI requests and the App's methods.
//!
//! The consensus connection is the single writer; CheckTx and Query take the
//! same lock but never touch the working tree (CheckTx is stateless
//! admission, Query reads committed versions only).

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use amo_types::{Address, TxCode};
use bytes::Bytes;
use futures::future::BoxFuture;
use tendermint::{
    AppHash,
    abci::{
        Code, Event, EventAttributeIndexExt as _,
        types::{BlockSignatureInfo, CommitInfo, Misbehavior, VoteInfo},
    },
    block::{BlockIdFlag, Height},
    v0_34::abci::{
        ConsensusRequest, ConsensusResponse, InfoRequest, InfoResponse, MempoolRequest,
        MempoolResponse, SnapshotRequest, SnapshotResponse, request, response,
    },
    validator,
    vote::Power,
};
use tokio::sync::RwLock;
use tower::{BoxError, Service};

use crate::app::App;
use crate::query;
use crate::tx::TxEvent;

const CODESPACE: &str = "amo";

/// The shared handle behind all four ABCI connections.
#[derive(Clone)]
pub struct Application {
    app: Arc<RwLock<App>>,
}

impl Application {
    pub fn new(app: App) -> Application {
        Application {
            app: Arc::new(RwLock::new(app)),
        }
    }

    pub fn app(&self) -> Arc<RwLock<App>> {
        self.app.clone()
    }

    pub fn split(&self) -> (Consensus, Mempool, Info, Snapshot) {
        (
            Consensus(self.clone()),
            Mempool(self.clone()),
            Info(self.clone()),
            Snapshot,
        )
    }
}

fn tx_code(code: TxCode) -> Code {
    match NonZeroU32::new(code.value()) {
        None => Code::Ok,
        Some(value) => Code::Err(value),
    }
}

fn convert_events(events: Vec<TxEvent>) -> Vec<Event> {
    events
        .into_iter()
        .map(|event| {
            Event::new(
                event.kind,
                event
                    .attributes
                    .into_iter()
                    .map(|(key, value)| (key, value).index()),
            )
        })
        .collect()
}

fn validator_updates(updates: Vec<(amo_types::PubKey, u64)>) -> Vec<validator::Update> {
    updates
        .into_iter()
        .filter_map(|(pub_key, power)| {
            let pub_key = tendermint::PublicKey::from_raw_ed25519(pub_key.as_bytes())?;
            let power = Power::try_from(power).ok()?;
            Some(validator::Update { pub_key, power })
        })
        .collect()
}

#[derive(Clone)]
pub struct Consensus(Application);

impl Service<ConsensusRequest> for Consensus {
    type Response = ConsensusResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsensusRequest) -> Self::Future {
        let handle = self.0.app();

        Box::pin(async move {
            Ok(match req {
                ConsensusRequest::InitChain(request::InitChain {
                    app_state_bytes, ..
                }) => {
                    let mut app = handle.write().await;
                    match app.init_chain(&app_state_bytes) {
                        Ok(validators) => {
                            let (_, _, _, app_hash) = app.info();
                            ConsensusResponse::InitChain(response::InitChain {
                                consensus_params: None,
                                validators: validator_updates(validators),
                                app_hash: AppHash::try_from(app_hash)
                                    .expect("app hash is 32 bytes"),
                            })
                        }
                        Err(e) => {
                            error!(?e, "InitChain failed");
                            ConsensusResponse::InitChain(response::InitChain {
                                consensus_params: None,
                                validators: vec![],
                                app_hash: AppHash::default(),
                            })
                        }
                    }
                }

                ConsensusRequest::BeginBlock(request::BeginBlock {
                    hash: _,
                    header,
                    last_commit_info: CommitInfo { round: _, votes },
                    byzantine_validators,
                }) => {
                    let proposer = Address::from_slice(header.proposer_address.as_bytes());
                    let evidence = byzantine_validators
                        .into_iter()
                        .map(|Misbehavior { validator, .. }| Address(validator.address))
                        .collect();
                    let votes = votes
                        .into_iter()
                        .map(|VoteInfo {
                                 validator,
                                 sig_info,
                             }| {
                            let signed = match sig_info {
                                BlockSignatureInfo::Flag(BlockIdFlag::Absent) => false,
                                BlockSignatureInfo::Flag(
                                    BlockIdFlag::Commit | BlockIdFlag::Nil,
                                )
                                | BlockSignatureInfo::LegacySigned => true,
                            };
                            (Address(validator.address), signed)
                        })
                        .collect();

                    handle.write().await.begin_block(
                        header.height.value(),
                        proposer,
                        evidence,
                        votes,
                    );
                    ConsensusResponse::BeginBlock(response::BeginBlock { events: vec![] })
                }

                ConsensusRequest::DeliverTx(request::DeliverTx { tx }) => {
                    let (code, info, events) = handle.write().await.deliver_tx(&tx);
                    ConsensusResponse::DeliverTx(response::DeliverTx {
                        code: tx_code(code),
                        log: info.clone(),
                        info,
                        events: convert_events(events),
                        codespace: CODESPACE.to_string(),
                        ..Default::default()
                    })
                }

                ConsensusRequest::EndBlock(request::EndBlock { height: _ }) => {
                    let updates = handle.write().await.end_block();
                    ConsensusResponse::EndBlock(response::EndBlock {
                        validator_updates: validator_updates(updates),
                        consensus_param_updates: None,
                        events: vec![],
                    })
                }

                ConsensusRequest::Commit => {
                    let data = handle.write().await.commit()?;
                    ConsensusResponse::Commit(response::Commit {
                        data: Bytes::from(data),
                        retain_height: Height::from(0u32),
                    })
                }
            })
        })
    }
}

#[derive(Clone)]
pub struct Mempool(Application);

impl Service<MempoolRequest> for Mempool {
    type Response = MempoolResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: MempoolRequest) -> Self::Future {
        let handle = self.0.app();

        Box::pin(async move {
            let MempoolRequest::CheckTx(request::CheckTx { tx, kind }) = req;
            let is_new = matches!(kind, request::CheckTxKind::New);
            let (code, info) = handle.read().await.check_tx(&tx, is_new);
            Ok(MempoolResponse::CheckTx(response::CheckTx {
                code: tx_code(code),
                log: info.clone(),
                info,
                codespace: CODESPACE.to_string(),
                ..Default::default()
            }))
        })
    }
}

#[derive(Clone)]
pub struct Info(Application);

impl Service<InfoRequest> for Info {
    type Response = InfoResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: InfoRequest) -> Self::Future {
        let handle = self.0.app();

        Box::pin(async move {
            Ok(match req {
                InfoRequest::Info(_) => {
                    let app = handle.read().await;
                    let (data, app_version, last_height, last_app_hash) = app.info();
                    InfoResponse::Info(response::Info {
                        data,
                        version: amo_types::AMO_APP_VERSION.to_string(),
                        app_version,
                        last_block_height: Height::try_from(last_height)?,
                        last_block_app_hash: AppHash::try_from(last_app_hash)?,
                    })
                }
                InfoRequest::Query(request::Query { data, path, .. }) => {
                    let app = handle.read().await;
                    let result = query::handle(&app, &path, &data);
                    InfoResponse::Query(response::Query {
                        code: match NonZeroU32::new(result.code.value()) {
                            None => Code::Ok,
                            Some(value) => Code::Err(value),
                        },
                        log: result.log.clone(),
                        info: result.log,
                        key: Bytes::from(result.key),
                        value: Bytes::from(result.value),
                        codespace: CODESPACE.to_string(),
                        ..Default::default()
                    })
                }
                InfoRequest::Echo(request::Echo { message }) => {
                    InfoResponse::Echo(response::Echo { message })
                }
                InfoRequest::SetOption(_) => InfoResponse::SetOption(response::SetOption {
                    code: Code::Ok,
                    log: String::new(),
                    info: String::new(),
                }),
            })
        })
    }
}

#[derive(Clone)]
pub struct Snapshot;

impl Service<SnapshotRequest> for Snapshot {
    type Response = SnapshotResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: SnapshotRequest) -> Self::Future {
        Box::pin(async move { Err("snapshots are not implemented".into()) })
    }
}
