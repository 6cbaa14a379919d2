//! The application driver: holds the persisted app state, the domain store,
//! and the per-block scratch, and sequences every consensus callback.

use std::path::PathBuf;

use amo_types::{
    AMO_PROTOCOL_VERSION, Address, AppConfig, Currency, GenesisAppState, HexBytes, PubKey, Stake,
    Tx, TxCode,
};
use color_eyre::{
    Report,
    eyre::{WrapErr, ensure, eyre},
};
use serde::{Deserialize, Serialize};

use crate::blockchain::{
    BlockBindingManager, LazinessCounter, ReplayPreventer, distribute_incentive, penalize_convicts,
};
use crate::governance;
use crate::kv::MemDb;
use crate::store::Store;
use crate::tx::{self, TxContext, TxEvent};

/// The four KV stores backing one replica. Handles are shared: reusing the
/// same `AppDbs` for a new `App` models a process restart.
#[derive(Clone, Default)]
pub struct AppDbs {
    pub merkle: MemDb,
    pub index: MemDb,
    pub incentive: MemDb,
    pub laziness: MemDb,
}

impl AppDbs {
    pub fn new() -> AppDbs {
        AppDbs::default()
    }
}

/// The state persisted to the state file, re-read on restart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub last_height: u64,
    pub last_app_hash: HexBytes,
    pub merkle_version: u64,
    pub next_draft_id: u32,
    pub counter_due: u64,
    /// Hash recorded at EndBlock, checked against the save at Commit.
    pub app_hash: HexBytes,
    /// Height of the block currently being processed.
    pub height: u64,
}

impl AppState {
    pub fn load_from(path: &PathBuf) -> Result<AppState, Report> {
        match std::fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Ok(AppState::default()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .wrap_err_with(|| format!("corrupt state file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppState::default()),
            Err(e) => Err(e).wrap_err_with(|| format!("could not read {}", path.display())),
        }
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<(), Report> {
        let bytes = serde_json::to_vec(self).expect("app state serializes infallibly");
        std::fs::write(path, bytes)
            .wrap_err_with(|| format!("could not write {}", path.display()))
    }
}

pub struct App {
    config: AppConfig,
    state: AppState,
    state_file: PathBuf,
    store: Store,

    laziness_db: MemDb,
    laziness_counter: LazinessCounter,
    block_binding: BlockBindingManager,
    replay_preventer: ReplayPreventer,

    // per-block scratch
    do_val_update: bool,
    old_vals: Vec<(PubKey, u64)>,
    staker: Option<Address>,
    fee_accumulated: Currency,
    num_delivered_txs: u64,
    pending_evidence: Vec<Address>,
    pending_lazy: Vec<Address>,
}

impl App {
    pub fn new(state_file: PathBuf, dbs: AppDbs) -> Result<App, Report> {
        let mut state = AppState::load_from(&state_file)?;
        let mut store = Store::new(dbs.merkle, dbs.index, dbs.incentive);
        state.merkle_version = store.load()?;

        let config = load_app_config(&store);
        let laziness_counter = LazinessCounter::new(
            dbs.laziness.clone(),
            state.counter_due,
            config.laziness_counter_window,
            config.laziness_threshold,
        );
        let block_binding =
            BlockBindingManager::new(config.block_bound_tx_grace_period, state.last_height);
        let replay_preventer =
            ReplayPreventer::new(config.block_bound_tx_grace_period, state.last_height);

        let app = App {
            config,
            state,
            state_file,
            store,
            laziness_db: dbs.laziness,
            laziness_counter,
            block_binding,
            replay_preventer,
            do_val_update: false,
            old_vals: Vec::new(),
            staker: None,
            fee_accumulated: Currency::zero(),
            num_delivered_txs: 0,
            pending_evidence: Vec::new(),
            pending_lazy: Vec::new(),
        };
        app.state.save_to(&app.state_file)?;
        Ok(app)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The Info callback: versions plus the last committed height and hash.
    pub fn info(&self) -> (String, u64, u64, Vec<u8>) {
        (
            hex::encode(&self.state.last_app_hash.0),
            AMO_PROTOCOL_VERSION,
            self.state.last_height,
            self.state.last_app_hash.0.clone(),
        )
    }

    /// Populate the store from the genesis app state and save the first
    /// version. Returns the initial validator set.
    pub fn init_chain(&mut self, app_state_bytes: &[u8]) -> Result<Vec<(PubKey, u64)>, Report> {
        let genesis: GenesisAppState =
            serde_json::from_slice(app_state_bytes).wrap_err("corrupt genesis app state")?;

        if let Some(config) = &genesis.config {
            let bytes = serde_json::to_vec(config).expect("config serializes infallibly");
            self.store.set_app_config(&bytes);
        }
        for balance in &genesis.balances {
            self.store.set_balance(&balance.addr, &balance.amount);
        }
        for stake in &genesis.stakes {
            self.store
                .set_unlocked_stake(
                    &stake.holder,
                    &Stake {
                        amount: stake.amount.clone(),
                        validator: stake.validator_pubkey,
                    },
                )
                .map_err(|code| eyre!("bad genesis stake for {}: {:?}", stake.holder, code))?;
        }
        for delegate in &genesis.delegates {
            self.store
                .set_delegate(
                    &delegate.delegator,
                    &amo_types::Delegate {
                        delegatee: delegate.delegatee,
                        amount: delegate.amount.clone(),
                    },
                )
                .map_err(|code| {
                    eyre!("bad genesis delegate for {}: {:?}", delegate.delegator, code)
                })?;
        }

        let (hash, version) = self.store.save();
        self.state.merkle_version = version;
        self.state.last_height = 0;
        self.state.last_app_hash = HexBytes(hash.to_vec());
        self.state.next_draft_id = 1;
        self.state.counter_due = 0;
        self.state.height = 0;

        self.config = load_app_config(&self.store);
        self.block_binding = BlockBindingManager::new(self.config.block_bound_tx_grace_period, 0);
        self.replay_preventer = ReplayPreventer::new(self.config.block_bound_tx_grace_period, 0);
        self.laziness_counter = LazinessCounter::new(
            self.laziness_db.clone(),
            0,
            self.config.laziness_counter_window,
            self.config.laziness_threshold,
        );

        self.state.save_to(&self.state_file)?;
        info!("new genesis app state applied");

        Ok(self
            .store
            .validator_updates(self.config.max_validators, false))
    }

    /// Start a block: advance the lifecycle managers, snapshot the old
    /// validator set, resolve the proposer's holder, zero the fee scratch,
    /// and take this block's convict candidates.
    pub fn begin_block(
        &mut self,
        height: u64,
        proposer: Option<Address>,
        byzantine_validators: Vec<Address>,
        last_commit_votes: Vec<(Address, bool)>,
    ) {
        self.state.height = height;
        self.block_binding.update(height);
        self.replay_preventer.update(height);

        self.do_val_update = false;
        self.old_vals = self
            .store
            .validator_updates(self.config.max_validators, false);

        self.staker = proposer.and_then(|addr| self.store.get_holder_by_validator(&addr));
        self.fee_accumulated = Currency::zero();
        self.num_delivered_txs = 0;

        self.pending_evidence = byzantine_validators;
        self.pending_lazy = self.laziness_counter.investigate(height, &last_commit_votes);
        self.state.counter_due = self.laziness_counter.due();
    }

    /// Stateless admission checks: parse, signature (for new txs only),
    /// block binding, replay, and the per-op shape check.
    pub fn check_tx(&self, tx_bytes: &[u8], is_new: bool) -> (TxCode, String) {
        let tx = match Tx::parse(tx_bytes) {
            Ok(tx) => tx,
            Err(e) => return (TxCode::BadParam, e.to_string()),
        };
        if is_new && !tx.verify() {
            return (TxCode::BadSignature, TxCode::BadSignature.info().to_string());
        }
        if !self.block_binding.check(tx.last_height) {
            return (TxCode::TooOldTx, TxCode::TooOldTx.info().to_string());
        }
        if !self.replay_preventer.check(&self.store, tx_bytes) {
            return (
                TxCode::AlreadyProcessedTx,
                TxCode::AlreadyProcessedTx.info().to_string(),
            );
        }
        let ctx = TxContext {
            config: &self.config,
            next_draft_id: self.state.next_draft_id,
        };
        tx::check(&ctx, &tx)
    }

    /// Apply one transaction. The fee is debited up front; a non-OK execute
    /// leaves state byte-identical to the pre-tx state, fee included.
    pub fn deliver_tx(&mut self, tx_bytes: &[u8]) -> (TxCode, String, Vec<TxEvent>) {
        let tx = match Tx::parse(tx_bytes) {
            Ok(tx) => tx,
            Err(e) => return (TxCode::BadParam, e.to_string(), Vec::new()),
        };
        if !self.block_binding.check(tx.last_height) {
            return (
                TxCode::TooOldTx,
                TxCode::TooOldTx.info().to_string(),
                Vec::new(),
            );
        }
        if !self.replay_preventer.append(&self.store, tx_bytes) {
            return (
                TxCode::AlreadyProcessedTx,
                TxCode::AlreadyProcessedTx.info().to_string(),
                Vec::new(),
            );
        }

        let balance = self.store.get_balance(&tx.sender, false);
        let Some(after_fee) = balance.checked_sub(&tx.fee) else {
            return (
                TxCode::NotEnoughBalance,
                "not enough balance to pay fee".to_string(),
                Vec::new(),
            );
        };

        let checkpoint = self.store.checkpoint();
        self.store.set_balance(&tx.sender, &after_fee);
        self.fee_accumulated += &tx.fee;

        let ctx = TxContext {
            config: &self.config,
            next_draft_id: self.state.next_draft_id,
        };
        let (code, info, op_events) = tx::execute(&ctx, &mut self.store, &tx);

        if code == TxCode::Ok {
            self.store.commit_checkpoint(checkpoint);
            if tx::updates_validators(&tx.kind) {
                self.do_val_update = true;
            }
            if tx.kind == tx::TYPE_PROPOSE {
                self.state.next_draft_id += 1;
            }
            self.num_delivered_txs += 1;

            let mut events = vec![TxEvent {
                kind: "default".to_string(),
                attributes: vec![
                    ("tx.type".to_string(), tx.kind.clone()),
                    ("tx.sender".to_string(), tx.sender.to_string()),
                ],
            }];
            events.extend(op_events);
            (code, info, events)
        } else {
            // The operation failed: revert everything including the fee.
            self.store.rollback(checkpoint);
            self.fee_accumulated = self.fee_accumulated.saturating_sub(&tx.fee);
            (code, info, Vec::new())
        }
    }

    /// Close the block: incentives, validator diff, stake unlock step,
    /// penalties, replay-index flush, draft processing, and the pending app
    /// hash.
    pub fn end_block(&mut self) -> Vec<(PubKey, u64)> {
        distribute_incentive(
            &mut self.store,
            self.config.weight_validator,
            self.config.weight_delegator,
            &self.config.blk_reward,
            &self.config.tx_reward,
            self.state.height,
            self.num_delivered_txs,
            self.staker.as_ref(),
            &self.fee_accumulated,
        );

        let mut updates = Vec::new();
        if self.do_val_update {
            self.do_val_update = false;
            let new_vals = self
                .store
                .validator_updates(self.config.max_validators, false);
            updates = find_val_updates(std::mem::take(&mut self.old_vals), new_vals);
        }

        self.store.loosen_locked_stakes();

        penalize_convicts(
            &mut self.store,
            &std::mem::take(&mut self.pending_evidence),
            &std::mem::take(&mut self.pending_lazy),
            self.config.weight_validator,
            self.config.weight_delegator,
            self.config.penalty_ratio_m,
            self.config.penalty_ratio_l,
        );

        self.replay_preventer.index(&mut self.store);

        if self.state.next_draft_id > 0 {
            governance::process_draft_votes(
                &mut self.store,
                self.state.next_draft_id - 1,
                self.config.max_validators,
                self.config.draft_quorum_rate,
                self.config.draft_pass_rate,
                self.config.draft_refund_rate,
            );
        }

        self.state.app_hash = HexBytes(self.store.root().to_vec());
        updates
    }

    /// Save the Merkle version. The saved hash must equal the hash recorded
    /// at EndBlock; disagreement means nondeterminism and halts the replica.
    pub fn commit(&mut self) -> Result<Vec<u8>, Report> {
        let (hash, version) = self.store.save();
        ensure!(
            hash.as_slice() == self.state.app_hash.as_slice(),
            "app hash changed between EndBlock and Commit"
        );

        self.state.merkle_version = version;
        self.state.last_app_hash = self.state.app_hash.clone();
        self.state.last_height = self.state.height;

        self.config = load_app_config(&self.store);
        self.state.save_to(&self.state_file)?;

        Ok(self.state.last_app_hash.0.clone())
    }
}

/// The stored config blob overlaid on the protocol defaults. A missing or
/// unparsable blob is an absent config, not an error; replicas that disagree
/// on it would fork on the app hash first.
fn load_app_config(store: &Store) -> AppConfig {
    match store.get_app_config(false) {
        Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        None => AppConfig::default(),
    }
}

/// The symmetric difference of two validator sets: removals carry power 0,
/// additions and power changes the new power, sorted by descending power
/// with ties broken by pubkey.
fn find_val_updates(
    mut old_vals: Vec<(PubKey, u64)>,
    mut new_vals: Vec<(PubKey, u64)>,
) -> Vec<(PubKey, u64)> {
    old_vals.sort_by(|a, b| a.0.cmp(&b.0));
    new_vals.sort_by(|a, b| a.0.cmp(&b.0));

    let mut updates = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < old_vals.len() && j < new_vals.len() {
        match old_vals[i].0.cmp(&new_vals[j].0) {
            std::cmp::Ordering::Less => {
                updates.push((old_vals[i].0, 0));
                i += 1;
            }
            std::cmp::Ordering::Equal => {
                updates.push(new_vals[j]);
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Greater => {
                updates.push(new_vals[j]);
                j += 1;
            }
        }
    }
    updates.extend(old_vals[i..].iter().map(|(key, _)| (*key, 0)));
    updates.extend(&new_vals[j..]);

    updates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    updates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> PubKey {
        PubKey([n; 32])
    }

    #[test]
    fn val_diff_matches_boundary_scenario() {
        // old [(P1,10),(P2,5)], new [(P1,12),(P3,3)]
        // => [(P1,12),(P3,3),(P2,0)] sorted by descending power
        let updates = find_val_updates(
            vec![(key(1), 10), (key(2), 5)],
            vec![(key(1), 12), (key(3), 3)],
        );
        assert_eq!(updates, vec![(key(1), 12), (key(3), 3), (key(2), 0)]);
    }

    #[test]
    fn val_diff_skips_unchanged_sets() {
        let updates = find_val_updates(vec![(key(1), 10)], vec![(key(1), 10)]);
        assert_eq!(updates, vec![(key(1), 10)]);
        assert!(find_val_updates(vec![], vec![]).is_empty());
    }

    #[test]
    fn val_diff_ties_break_by_pubkey() {
        let updates = find_val_updates(vec![], vec![(key(5), 7), (key(2), 7)]);
        assert_eq!(updates, vec![(key(2), 7), (key(5), 7)]);
    }

    #[test]
    fn app_state_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let state = AppState {
            last_height: 12,
            last_app_hash: HexBytes(vec![1, 2, 3]),
            merkle_version: 13,
            next_draft_id: 4,
            counter_due: 100,
            app_hash: HexBytes(vec![4, 5]),
            height: 13,
        };
        state.save_to(&path).expect("save");
        assert_eq!(AppState::load_from(&path).expect("load"), state);

        let missing = dir.path().join("absent.json");
        assert_eq!(AppState::load_from(&missing).expect("load"), AppState::default());
    }
}
