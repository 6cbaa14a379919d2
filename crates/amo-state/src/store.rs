//! The typed façade over the Merkle tree and the secondary index stores.
//!
//! The Merkle tree exclusively owns the economically significant state
//! (balances, stakes, delegates, drafts, votes, parcels, requests, usages,
//! app config). The index stores are derived views — validator→holder,
//! delegatee→delegators, the ordered effective-stake index, the block↔tx-hash
//! index, and the incentive/penalty history — and every primary mutation
//! updates its dependent indexes within the same call.

use amo_types::{
    ADDRESS_SIZE, Address, Currency, Delegate, DelegateEx, Draft, Parcel, PubKey, Request,
    RequestEx, Stake, TxCode, Usage, UsageEx, Vote, VoteInfo,
};
use color_eyre::Report;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::kv::MemDb;
use crate::merkle::{MerkleTree, TreeSnapshot};

mod history;
mod tx_index;

// Division by 2 is for safeguarding against the consensus engine's own
// overflow checks.
pub const MAX_TOTAL_VOTING_POWER: u64 = (i64::MAX as u64 / 8) / 2;

const PREFIX_BALANCE: &[u8] = b"balance:";
const PREFIX_STAKE: &[u8] = b"stake:";
const PREFIX_DRAFT: &[u8] = b"draft:";
const PREFIX_VOTE: &[u8] = b"vote:";
const PREFIX_DELEGATE: &[u8] = b"delegate:";
const PREFIX_PARCEL: &[u8] = b"parcel:";
const PREFIX_REQUEST: &[u8] = b"request:";
const PREFIX_USAGE: &[u8] = b"usage:";
const KEY_CONFIG: &[u8] = b"config";

const INDEX_DELEGATOR: &[u8] = b"delegator:";
const INDEX_VALIDATOR: &[u8] = b"validator:";
const INDEX_EFF_STAKE: &[u8] = b"effstake:";

pub struct Store {
    merkle: MerkleTree,
    index: MemDb,
    incentive: MemDb,
}

/// A per-tx savepoint covering the Merkle working tree and the index store.
pub struct Checkpoint {
    tree: TreeSnapshot,
}

impl Store {
    pub fn new(merkle_db: MemDb, index_db: MemDb, incentive_db: MemDb) -> Store {
        Store {
            merkle: MerkleTree::new(merkle_db),
            index: index_db,
            incentive: incentive_db,
        }
    }

    // MERKLE TREE SCOPE
    // set/remove      -> working tree only
    // get(committed)  -> the latest saved version
    // get(!committed) -> working tree

    fn get_raw(&self, key: &[u8], committed: bool) -> Option<Vec<u8>> {
        if committed {
            self.merkle.get_versioned(key, self.merkle.version())
        } else {
            self.merkle.get_working(key)
        }
    }

    fn get_json<T: DeserializeOwned>(&self, key: &[u8], committed: bool) -> Option<T> {
        let bytes = self.get_raw(key, committed)?;
        serde_json::from_slice(&bytes).ok()
    }

    fn set_json<T: Serialize>(&mut self, key: &[u8], value: &T) {
        let bytes = serde_json::to_vec(value).expect("domain records serialize infallibly");
        self.merkle.set(key, &bytes);
    }

    fn iterate(
        &self,
        committed: bool,
        start: &[u8],
        end: Option<&[u8]>,
        ascending: bool,
        f: impl FnMut(&[u8], &[u8]) -> bool,
    ) {
        if committed {
            self.merkle
                .iterate_range_at(self.merkle.version(), start, end, ascending, f);
        } else {
            self.merkle.iterate_range(start, end, ascending, f);
        }
    }

    /// Hash of the working tree; the app hash the next save will commit.
    pub fn root(&self) -> [u8; 32] {
        self.merkle.working_hash()
    }

    pub fn save(&mut self) -> ([u8; 32], u64) {
        self.merkle.save()
    }

    pub fn load(&mut self) -> Result<u64, Report> {
        self.merkle.load()
    }

    pub fn load_version_for_overwriting(&mut self, version: u64) -> Result<u64, Report> {
        self.merkle.load_version_for_overwriting(version)
    }

    pub fn merkle_version(&self) -> u64 {
        self.merkle.version()
    }

    pub fn checkpoint(&mut self) -> Checkpoint {
        self.index.begin_undo();
        Checkpoint {
            tree: self.merkle.snapshot(),
        }
    }

    pub fn commit_checkpoint(&mut self, _checkpoint: Checkpoint) {
        self.index.commit_undo();
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.index.revert_undo();
        self.merkle.restore(checkpoint.tree);
    }

    // Balance store

    pub fn set_balance(&mut self, addr: &Address, balance: &Currency) {
        let key = balance_key(addr);
        // Zero balances are not stored.
        if balance.is_zero() {
            self.merkle.remove(&key);
        } else {
            self.set_json(&key, balance);
        }
    }

    pub fn get_balance(&self, addr: &Address, committed: bool) -> Currency {
        self.get_json(&balance_key(addr), committed).unwrap_or_default()
    }

    // Stake store
    //
    // Every unlocked- or locked-stake write flows through the same protocol:
    // validator-match check, stake-deletion guard, old effstake entry out,
    // primary write, validator index refresh, new effstake entry in.

    fn check_validator_match(
        &self,
        holder: &Address,
        stake: &Stake,
        committed: bool,
    ) -> Result<(), TxCode> {
        if let Some(prev_holder) = self.get_holder_by_validator(&stake.validator.address()) {
            if prev_holder != *holder {
                return Err(TxCode::PermissionDenied);
            }
        }
        if let Some(prev) = self.get_stake(holder, committed) {
            if prev.validator != stake.validator {
                return Err(TxCode::BadValidator);
            }
        }
        Ok(())
    }

    fn check_stake_deletion(
        &self,
        holder: &Address,
        stake: &Stake,
        height: Option<u64>,
        committed: bool,
    ) -> Result<(), TxCode> {
        if !stake.amount.is_zero() {
            return Ok(());
        }
        let Some(whole) = self.get_stake(holder, committed) else {
            return Ok(());
        };
        let target = match height {
            None => self.get_unlocked_stake(holder, committed),
            Some(h) => self.get_locked_stake(holder, h, committed),
        };
        let target_amount = target.map(|s| s.amount).unwrap_or_default();
        if whole.amount.saturating_sub(&target_amount).is_zero() {
            // The whole stake for this holder goes to zero. Check whether
            // that is allowed.
            if !self.get_delegates_by_delegatee(holder, committed).is_empty() {
                return Err(TxCode::DelegateExists);
            }
            if self.top_stakes(2, None, committed).len() == 1 {
                // Requested 2 but got 1: this is the last validator.
                return Err(TxCode::LastValidator);
            }
        }
        Ok(())
    }

    fn set_stake_record(
        &mut self,
        holder: &Address,
        stake: &Stake,
        height: Option<u64>,
    ) -> Result<(), TxCode> {
        self.check_validator_match(holder, stake, false)?;
        self.check_stake_deletion(holder, stake, height, false)?;

        // Drop the pre-update effstake entry.
        if let Some(eff) = self.get_eff_stake(holder, false) {
            self.index.delete(&eff_stake_key(&eff.amount, holder));
        }

        let key = match height {
            None => stake_key(holder),
            Some(h) => locked_stake_key(holder, h),
        };
        if stake.amount.is_zero() {
            self.merkle.remove(&key);
        } else {
            self.set_json(&key, stake);
        }

        // The validator index holds an entry iff the holder still has stake;
        // the effstake index likewise.
        match self.get_eff_stake(holder, false) {
            None => {
                self.index.delete(&validator_key(&stake.validator.address()));
            }
            Some(eff) => {
                self.index
                    .set(&validator_key(&stake.validator.address()), holder.as_bytes());
                self.index.set(&eff_stake_key(&eff.amount, holder), &[]);
            }
        }
        Ok(())
    }

    pub fn set_unlocked_stake(
        &mut self,
        holder: &Address,
        stake: &Stake,
    ) -> Result<(), TxCode> {
        self.set_stake_record(holder, stake, None)
    }

    /// Store a stake locked for `height` more blocks. The height decrements
    /// each time `loosen_locked_stakes` runs.
    pub fn set_locked_stake(
        &mut self,
        holder: &Address,
        stake: &Stake,
        height: u64,
    ) -> Result<(), TxCode> {
        self.set_stake_record(holder, stake, Some(height))
    }

    /// Drain `amount` from the holder's stake: the unlocked record first,
    /// then locked records nearest-to-unlock first.
    pub fn slash_stakes(&mut self, holder: &Address, mut amount: Currency) {
        if self.get_stake(holder, false).is_none() {
            return;
        }

        if let Some(mut unlocked) = self.get_unlocked_stake(holder, false) {
            let cut = amount.clone().min(unlocked.amount.clone());
            unlocked.amount = unlocked.amount.saturating_sub(&cut);
            amount = amount.saturating_sub(&cut);
            if let Err(code) = self.set_unlocked_stake(holder, &unlocked) {
                warn!(holder = %holder, ?code, "could not slash unlocked stake");
            }
            if amount.is_zero() {
                return;
            }
        }

        for (height, mut locked) in self.get_locked_stakes_with_height(holder, false) {
            let cut = amount.clone().min(locked.amount.clone());
            locked.amount = locked.amount.saturating_sub(&cut);
            amount = amount.saturating_sub(&cut);
            if let Err(code) = self.set_locked_stake(holder, &locked, height) {
                warn!(holder = %holder, height, ?code, "could not slash locked stake");
            }
            if amount.is_zero() {
                break;
            }
        }
    }

    /// The once-per-EndBlock unlock step: decrement every locked record's
    /// remaining height, merging records that reach zero into the holder's
    /// unlocked stake.
    pub fn loosen_locked_stakes(&mut self) {
        let mut locked: Vec<(Address, u64, Stake)> = Vec::new();
        self.iterate(false, PREFIX_STAKE, None, true, |key, value| {
            if !key.starts_with(PREFIX_STAKE) {
                return true;
            }
            if key.len() == PREFIX_STAKE.len() + ADDRESS_SIZE {
                // unlocked stake
                return false;
            }
            let Some((holder, height)) = split_locked_stake_key(key) else {
                return false;
            };
            if height == 0 {
                // corrupt key; nothing to do here but skip it
                return false;
            }
            let Ok(stake) = serde_json::from_slice::<Stake>(value) else {
                return false;
            };
            locked.push((holder, height, stake));
            false
        });

        for (holder, height, stake) in locked {
            self.merkle.remove(&locked_stake_key(&holder, height));
            if height - 1 == 0 {
                let merged = match self.get_unlocked_stake(&holder, false) {
                    None => stake,
                    Some(mut unlocked) => {
                        unlocked.amount += &stake.amount;
                        unlocked
                    }
                };
                if let Err(code) = self.set_unlocked_stake(&holder, &merged) {
                    warn!(holder = %holder, ?code, "could not unlock stake");
                }
            } else if let Err(code) = self.set_locked_stake(&holder, &stake, height - 1) {
                warn!(holder = %holder, height, ?code, "could not rewrite locked stake");
            }
        }
    }

    /// The holder's total stake across the unlocked record and all locked
    /// records. None if the holder has no stake, or if the records disagree
    /// on the validator key (store corruption).
    pub fn get_stake(&self, holder: &Address, committed: bool) -> Option<Stake> {
        let mut stake = self.get_unlocked_stake(holder, committed);
        for (_, locked) in self.get_locked_stakes_with_height(holder, committed) {
            match &mut stake {
                None => stake = Some(locked),
                Some(total) => {
                    if total.validator != locked.validator {
                        return None;
                    }
                    total.amount += &locked.amount;
                }
            }
        }
        stake
    }

    pub fn get_unlocked_stake(&self, holder: &Address, committed: bool) -> Option<Stake> {
        self.get_json(&stake_key(holder), committed)
    }

    pub fn get_locked_stake(
        &self,
        holder: &Address,
        height: u64,
        committed: bool,
    ) -> Option<Stake> {
        self.get_json(&locked_stake_key(holder, height), committed)
    }

    /// All locked records for the holder, ascending by remaining height
    /// (nearest-to-unlock first).
    pub fn get_locked_stakes_with_height(
        &self,
        holder: &Address,
        committed: bool,
    ) -> Vec<(u64, Stake)> {
        let holder_key = stake_key(holder);
        let start = locked_stake_key(holder, 0);
        let mut stakes = Vec::new();
        self.iterate(committed, &start, None, true, |key, value| {
            if !key.starts_with(&holder_key) {
                return true;
            }
            let Some((_, height)) = split_locked_stake_key(key) else {
                return false;
            };
            if let Ok(stake) = serde_json::from_slice::<Stake>(value) {
                stakes.push((height, stake));
            }
            false
        });
        stakes
    }

    pub fn get_stake_by_validator(&self, addr: &Address, committed: bool) -> Option<Stake> {
        let holder = self.get_holder_by_validator(addr)?;
        self.get_stake(&holder, committed)
    }

    pub fn get_holder_by_validator(&self, addr: &Address) -> Option<Address> {
        let holder = self.index.get(&validator_key(addr))?;
        Address::from_slice(&holder)
    }

    // Delegate store

    /// Write a delegate record, maintaining the delegatee→delegator index and
    /// the delegatee's effstake entry.
    pub fn set_delegate(
        &mut self,
        delegator: &Address,
        delegate: &Delegate,
    ) -> Result<(), TxCode> {
        let Some(eff) = self.get_eff_stake(&delegate.delegatee, false) else {
            return Err(TxCode::NoStake);
        };
        self.index
            .delete(&eff_stake_key(&eff.amount, &delegate.delegatee));

        let mut delegator_index = INDEX_DELEGATOR.to_vec();
        delegator_index.extend_from_slice(delegate.delegatee.as_bytes());
        delegator_index.extend_from_slice(delegator.as_bytes());

        if delegate.amount.is_zero() {
            self.merkle.remove(&delegate_key(delegator));
            self.index.delete(&delegator_index);
        } else {
            let bytes = serde_json::to_vec(delegate).expect("delegate serializes infallibly");
            self.merkle.set(&delegate_key(delegator), &bytes);
            self.index.set(&delegator_index, &[]);
        }

        let eff = self
            .get_eff_stake(&delegate.delegatee, false)
            .expect("delegatee stake checked above");
        self.index
            .set(&eff_stake_key(&eff.amount, &delegate.delegatee), &[]);
        Ok(())
    }

    pub fn get_delegate(&self, delegator: &Address, committed: bool) -> Option<Delegate> {
        self.get_json(&delegate_key(delegator), committed)
    }

    pub fn get_delegates_by_delegatee(
        &self,
        delegatee: &Address,
        committed: bool,
    ) -> Vec<DelegateEx> {
        let mut prefix = INDEX_DELEGATOR.to_vec();
        prefix.extend_from_slice(delegatee.as_bytes());
        let mut delegates = Vec::new();
        for (key, _) in self.index.scan_prefix(&prefix, false) {
            let Some(delegator) = Address::from_slice(&key[prefix.len()..]) else {
                continue;
            };
            if let Some(delegate) = self.get_delegate(&delegator, committed) {
                delegates.push(DelegateEx {
                    delegator,
                    delegate,
                });
            }
        }
        delegates
    }

    /// The holder's own total stake plus all delegated amounts.
    pub fn get_eff_stake(&self, delegatee: &Address, committed: bool) -> Option<Stake> {
        let mut stake = self.get_stake(delegatee, committed)?;
        for delegate in self.get_delegates_by_delegatee(delegatee, committed) {
            stake.amount += &delegate.delegate.amount;
        }
        Some(stake)
    }

    /// Top stakes by effective amount, served by a reverse scan of the
    /// ordered effstake index. In peek mode, returns the single entry for
    /// `peek` if it ranks within `max`, else nothing.
    pub fn top_stakes(&self, max: u64, peek: Option<&Address>, committed: bool) -> Vec<Stake> {
        let mut stakes = Vec::new();
        let mut count = 0u64;
        for (key, _) in self.index.scan_prefix(INDEX_EFF_STAKE, true) {
            if count >= max {
                break;
            }
            let body = &key[INDEX_EFF_STAKE.len()..];
            if body.len() != 32 + ADDRESS_SIZE {
                continue;
            }
            let amount = Currency::from_key_bytes(&body[..32]);
            let Some(holder) = Address::from_slice(&body[32..]) else {
                continue;
            };
            if let Some(peek) = peek {
                if holder == *peek {
                    if let Some(stake) = self.get_stake(&holder, committed) {
                        stakes.push(stake);
                    }
                    return stakes;
                }
            } else if let Some(mut stake) = self.get_stake(&holder, committed) {
                stake.amount = amount;
                stakes.push(stake);
            }
            count += 1;
        }
        stakes
    }

    /// The validator set derived from the top stakes, with raw amounts
    /// right-shifted by the smallest factor that keeps the total within
    /// `MAX_TOTAL_VOTING_POWER`. Post-shift zero powers are dropped.
    pub fn validator_updates(&self, max: u64, committed: bool) -> Vec<(PubKey, u64)> {
        let stakes = self.top_stakes(max, None, committed);
        let limit = Currency::from(MAX_TOTAL_VOTING_POWER);
        let mut shift = 0u64;
        loop {
            let mut total = Currency::zero();
            for stake in &stakes {
                total += &stake.amount.shr(shift);
            }
            if total <= limit {
                break;
            }
            shift += 1;
        }
        stakes
            .into_iter()
            .filter_map(|stake| {
                let power = stake
                    .amount
                    .shr(shift)
                    .to_u64()
                    .expect("shifted power fits u64");
                (power > 0).then_some((stake.validator, power))
            })
            .collect()
    }

    // Draft store

    pub fn set_draft(&mut self, draft_id: u32, draft: &Draft) {
        self.set_json(&draft_key(draft_id), draft);
    }

    pub fn get_draft(&self, draft_id: u32, committed: bool) -> Option<Draft> {
        self.get_json(&draft_key(draft_id), committed)
    }

    // Vote store

    pub fn set_vote(&mut self, draft_id: u32, voter: &Address, vote: &Vote) {
        self.set_json(&vote_key(draft_id, voter), vote);
    }

    pub fn get_vote(&self, draft_id: u32, voter: &Address, committed: bool) -> Option<Vote> {
        self.get_json(&vote_key(draft_id, voter), committed)
    }

    pub fn get_votes(&self, draft_id: u32, committed: bool) -> Vec<VoteInfo> {
        let mut prefix = PREFIX_VOTE.to_vec();
        prefix.extend_from_slice(&draft_id.to_be_bytes());
        let mut votes = Vec::new();
        self.iterate(committed, &prefix, None, true, |key, value| {
            if !key.starts_with(&prefix) {
                return true;
            }
            let Some(voter) = Address::from_slice(&key[prefix.len()..]) else {
                return false;
            };
            if let Ok(vote) = serde_json::from_slice::<Vote>(value) {
                votes.push(VoteInfo { voter, vote });
            }
            false
        });
        votes
    }

    pub fn delete_vote(&mut self, draft_id: u32, voter: &Address) {
        self.merkle.remove(&vote_key(draft_id, voter));
    }

    // Parcel store

    pub fn set_parcel(&mut self, parcel_id: &[u8], parcel: &Parcel) {
        self.set_json(&parcel_key(parcel_id), parcel);
    }

    pub fn get_parcel(&self, parcel_id: &[u8], committed: bool) -> Option<Parcel> {
        self.get_json(&parcel_key(parcel_id), committed)
    }

    pub fn delete_parcel(&mut self, parcel_id: &[u8]) {
        self.merkle.remove(&parcel_key(parcel_id));
    }

    // Request store. Requests live under a buyer-first key, with an empty
    // parcel-first companion key serving as the per-parcel index.

    pub fn set_request(&mut self, buyer: &Address, parcel_id: &[u8], request: &Request) {
        let (buyer_parcel, parcel_buyer) = request_keys(buyer, parcel_id);
        let bytes = serde_json::to_vec(request).expect("request serializes infallibly");
        self.merkle.set(&buyer_parcel, &bytes);
        self.merkle.set(&parcel_buyer, &[]);
    }

    pub fn get_request(&self, buyer: &Address, parcel_id: &[u8], committed: bool) -> Option<Request> {
        let (buyer_parcel, _) = request_keys(buyer, parcel_id);
        self.get_json(&buyer_parcel, committed)
    }

    pub fn get_requests(&self, parcel_id: &[u8], committed: bool) -> Vec<RequestEx> {
        let mut prefix = PREFIX_REQUEST.to_vec();
        prefix.extend_from_slice(parcel_id);
        prefix.push(b':');
        let mut requests = Vec::new();
        self.iterate(committed, &prefix, None, true, |key, _| {
            if !key.starts_with(&prefix) {
                return true;
            }
            let Some(buyer) = Address::from_slice(&key[prefix.len()..]) else {
                return false;
            };
            if let Some(request) = self.get_request(&buyer, parcel_id, committed) {
                requests.push(RequestEx { request, buyer });
            }
            false
        });
        requests
    }

    pub fn delete_request(&mut self, buyer: &Address, parcel_id: &[u8]) {
        let (buyer_parcel, parcel_buyer) = request_keys(buyer, parcel_id);
        self.merkle.remove(&buyer_parcel);
        self.merkle.remove(&parcel_buyer);
    }

    // Usage store, mirrored like the request store.

    pub fn set_usage(&mut self, buyer: &Address, parcel_id: &[u8], usage: &Usage) {
        let (buyer_parcel, parcel_buyer) = usage_keys(buyer, parcel_id);
        let bytes = serde_json::to_vec(usage).expect("usage serializes infallibly");
        self.merkle.set(&buyer_parcel, &bytes);
        self.merkle.set(&parcel_buyer, &[]);
    }

    pub fn get_usage(&self, buyer: &Address, parcel_id: &[u8], committed: bool) -> Option<Usage> {
        let (buyer_parcel, _) = usage_keys(buyer, parcel_id);
        self.get_json(&buyer_parcel, committed)
    }

    pub fn get_usages(&self, parcel_id: &[u8], committed: bool) -> Vec<UsageEx> {
        let mut prefix = PREFIX_USAGE.to_vec();
        prefix.extend_from_slice(parcel_id);
        prefix.push(b':');
        let mut usages = Vec::new();
        self.iterate(committed, &prefix, None, true, |key, _| {
            if !key.starts_with(&prefix) {
                return true;
            }
            let Some(buyer) = Address::from_slice(&key[prefix.len()..]) else {
                return false;
            };
            if let Some(usage) = self.get_usage(&buyer, parcel_id, committed) {
                usages.push(UsageEx { usage, buyer });
            }
            false
        });
        usages
    }

    pub fn delete_usage(&mut self, buyer: &Address, parcel_id: &[u8]) {
        let (buyer_parcel, parcel_buyer) = usage_keys(buyer, parcel_id);
        self.merkle.remove(&buyer_parcel);
        self.merkle.remove(&parcel_buyer);
    }

    // App config blob

    pub fn set_app_config(&mut self, config: &[u8]) {
        self.merkle.set(KEY_CONFIG, config);
    }

    pub fn get_app_config(&self, committed: bool) -> Option<Vec<u8>> {
        self.get_raw(KEY_CONFIG, committed)
    }
}

fn balance_key(addr: &Address) -> Vec<u8> {
    [PREFIX_BALANCE, addr.as_bytes()].concat()
}

fn stake_key(holder: &Address) -> Vec<u8> {
    [PREFIX_STAKE, holder.as_bytes()].concat()
}

fn locked_stake_key(holder: &Address, height: u64) -> Vec<u8> {
    [PREFIX_STAKE, holder.as_bytes(), &height.to_be_bytes()].concat()
}

fn split_locked_stake_key(key: &[u8]) -> Option<(Address, u64)> {
    if key.len() != PREFIX_STAKE.len() + ADDRESS_SIZE + 8 {
        return None;
    }
    let holder = Address::from_slice(&key[PREFIX_STAKE.len()..PREFIX_STAKE.len() + ADDRESS_SIZE])?;
    let height = u64::from_be_bytes(
        key[PREFIX_STAKE.len() + ADDRESS_SIZE..]
            .try_into()
            .expect("8 bytes"),
    );
    Some((holder, height))
}

fn delegate_key(delegator: &Address) -> Vec<u8> {
    [PREFIX_DELEGATE, delegator.as_bytes()].concat()
}

fn validator_key(addr: &Address) -> Vec<u8> {
    [INDEX_VALIDATOR, addr.as_bytes()].concat()
}

fn eff_stake_key(amount: &Currency, holder: &Address) -> Vec<u8> {
    [INDEX_EFF_STAKE, &amount.to_key_bytes(), holder.as_bytes()].concat()
}

fn draft_key(draft_id: u32) -> Vec<u8> {
    [PREFIX_DRAFT, &draft_id.to_be_bytes()[..]].concat()
}

fn vote_key(draft_id: u32, voter: &Address) -> Vec<u8> {
    [PREFIX_VOTE, &draft_id.to_be_bytes(), voter.as_bytes()].concat()
}

fn parcel_key(parcel_id: &[u8]) -> Vec<u8> {
    [PREFIX_PARCEL, parcel_id].concat()
}

fn request_keys(buyer: &Address, parcel_id: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (
        [PREFIX_REQUEST, buyer.as_bytes(), b":", parcel_id].concat(),
        [PREFIX_REQUEST, parcel_id, b":", buyer.as_bytes()].concat(),
    )
}

fn usage_keys(buyer: &Address, parcel_id: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (
        [PREFIX_USAGE, buyer.as_bytes(), b":", parcel_id].concat(),
        [PREFIX_USAGE, parcel_id, b":", buyer.as_bytes()].concat(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn store() -> Store {
        Store::new(MemDb::new(), MemDb::new(), MemDb::new())
    }

    pub(crate) fn addr(n: u8) -> Address {
        Address([n; ADDRESS_SIZE])
    }

    pub(crate) fn pub_key(n: u8) -> PubKey {
        PubKey([n; 32])
    }

    fn stake(amount: u64, validator: PubKey) -> Stake {
        Stake {
            amount: Currency::from(amount),
            validator,
        }
    }

    #[test]
    fn balance_zero_is_absent() {
        let mut s = store();
        s.set_balance(&addr(1), &Currency::from(10));
        assert_eq!(s.get_balance(&addr(1), false), Currency::from(10));
        s.set_balance(&addr(1), &Currency::zero());
        assert!(!s.merkle.has(&balance_key(&addr(1))));
        assert_eq!(s.get_balance(&addr(1), false), Currency::zero());
    }

    #[test]
    fn committed_reads_lag_working_writes() {
        let mut s = store();
        s.set_balance(&addr(1), &Currency::from(10));
        s.save();
        s.set_balance(&addr(1), &Currency::from(20));
        assert_eq!(s.get_balance(&addr(1), true), Currency::from(10));
        assert_eq!(s.get_balance(&addr(1), false), Currency::from(20));
    }

    #[test]
    fn stake_mutation_maintains_indexes() {
        let mut s = store();
        s.set_unlocked_stake(&addr(1), &stake(100, pub_key(0xa1))).expect("set");
        assert_eq!(
            s.get_holder_by_validator(&pub_key(0xa1).address()),
            Some(addr(1))
        );
        let top = s.top_stakes(10, None, false);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].amount, Currency::from(100));

        // raising the stake moves the effstake entry rather than duplicating it
        s.set_unlocked_stake(&addr(1), &stake(250, pub_key(0xa1))).expect("set");
        let top = s.top_stakes(10, None, false);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].amount, Currency::from(250));
    }

    #[test]
    fn validator_key_is_exclusive() {
        let mut s = store();
        s.set_unlocked_stake(&addr(1), &stake(100, pub_key(0xa1))).expect("set");
        let err = s.set_unlocked_stake(&addr(2), &stake(50, pub_key(0xa1)));
        assert_eq!(err, Err(TxCode::PermissionDenied));
        // and a holder cannot switch validator keys while staked
        let err = s.set_unlocked_stake(&addr(1), &stake(50, pub_key(0xa2)));
        assert_eq!(err, Err(TxCode::BadValidator));
    }

    #[test]
    fn last_validator_cannot_be_deleted() {
        let mut s = store();
        s.set_unlocked_stake(&addr(1), &stake(100, pub_key(0xa1))).expect("set");
        let err = s.set_unlocked_stake(&addr(1), &stake(0, pub_key(0xa1)));
        assert_eq!(err, Err(TxCode::LastValidator));

        s.set_unlocked_stake(&addr(2), &stake(100, pub_key(0xa2))).expect("set");
        s.set_unlocked_stake(&addr(1), &stake(0, pub_key(0xa1))).expect("now deletable");
        assert_eq!(s.get_holder_by_validator(&pub_key(0xa1).address()), None);
        assert_eq!(s.top_stakes(10, None, false).len(), 1);
    }

    #[test]
    fn delegate_blocks_stake_deletion() {
        let mut s = store();
        s.set_unlocked_stake(&addr(1), &stake(100, pub_key(0xa1))).expect("set");
        s.set_unlocked_stake(&addr(2), &stake(100, pub_key(0xa2))).expect("set");
        s.set_delegate(
            &addr(3),
            &Delegate {
                delegatee: addr(1),
                amount: Currency::from(30),
            },
        )
        .expect("delegate");

        let err = s.set_unlocked_stake(&addr(1), &stake(0, pub_key(0xa1)));
        assert_eq!(err, Err(TxCode::DelegateExists));
    }

    #[test]
    fn eff_stake_includes_delegates_and_orders_top() {
        let mut s = store();
        s.set_unlocked_stake(&addr(1), &stake(100, pub_key(0xa1))).expect("set");
        s.set_unlocked_stake(&addr(2), &stake(120, pub_key(0xa2))).expect("set");
        s.set_delegate(
            &addr(3),
            &Delegate {
                delegatee: addr(1),
                amount: Currency::from(50),
            },
        )
        .expect("delegate");

        assert_eq!(
            s.get_eff_stake(&addr(1), false).expect("eff").amount,
            Currency::from(150)
        );
        let top = s.top_stakes(10, None, false);
        assert_eq!(top[0].validator, pub_key(0xa1));
        assert_eq!(top[0].amount, Currency::from(150));
        assert_eq!(top[1].amount, Currency::from(120));

        // peek mode finds a ranked holder and misses others
        assert_eq!(s.top_stakes(10, Some(&addr(2)), false).len(), 1);
        assert_eq!(s.top_stakes(1, Some(&addr(2)), false).len(), 0);
        assert_eq!(s.top_stakes(10, Some(&addr(9)), false).len(), 0);
    }

    #[test]
    fn delegate_retraction_updates_indexes() {
        let mut s = store();
        s.set_unlocked_stake(&addr(1), &stake(100, pub_key(0xa1))).expect("set");
        s.set_delegate(
            &addr(3),
            &Delegate {
                delegatee: addr(1),
                amount: Currency::from(50),
            },
        )
        .expect("delegate");
        s.set_delegate(
            &addr(3),
            &Delegate {
                delegatee: addr(1),
                amount: Currency::zero(),
            },
        )
        .expect("retract");
        assert_eq!(s.get_delegate(&addr(3), false), None);
        assert!(s.get_delegates_by_delegatee(&addr(1), false).is_empty());
        assert_eq!(
            s.get_eff_stake(&addr(1), false).expect("eff").amount,
            Currency::from(100)
        );
    }

    #[test]
    fn slash_drains_unlocked_then_nearest_locked() {
        let mut s = store();
        s.set_unlocked_stake(&addr(1), &stake(100, pub_key(0xa1))).expect("set");
        s.set_locked_stake(&addr(1), &stake(40, pub_key(0xa1)), 5).expect("lock");
        s.set_locked_stake(&addr(1), &stake(60, pub_key(0xa1)), 9).expect("lock");

        s.slash_stakes(&addr(1), Currency::from(120));

        assert_eq!(s.get_unlocked_stake(&addr(1), false), None);
        // nearest-to-unlock (height 5) consumed first
        assert_eq!(s.get_locked_stake(&addr(1), 5, false).expect("kept").amount, Currency::from(20));
        assert_eq!(s.get_locked_stake(&addr(1), 9, false).expect("kept").amount, Currency::from(60));
        assert_eq!(s.get_stake(&addr(1), false).expect("total").amount, Currency::from(80));
    }

    #[test]
    fn loosen_decrements_and_merges() {
        let mut s = store();
        s.set_locked_stake(&addr(1), &stake(70, pub_key(0xa1)), 2).expect("lock");
        s.loosen_locked_stakes();
        assert_eq!(s.get_locked_stake(&addr(1), 1, false).expect("moved").amount, Currency::from(70));
        assert_eq!(s.get_unlocked_stake(&addr(1), false), None);

        s.loosen_locked_stakes();
        assert_eq!(s.get_locked_stake(&addr(1), 1, false), None);
        assert_eq!(s.get_unlocked_stake(&addr(1), false).expect("merged").amount, Currency::from(70));
        // the effstake index still carries exactly one correct entry
        let top = s.top_stakes(10, None, false);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].amount, Currency::from(70));
    }

    #[test]
    fn checkpoint_rollback_restores_tree_and_indexes() {
        let mut s = store();
        s.set_unlocked_stake(&addr(1), &stake(100, pub_key(0xa1))).expect("set");
        let root_before = s.root();

        let checkpoint = s.checkpoint();
        s.set_balance(&addr(2), &Currency::from(5));
        s.set_unlocked_stake(&addr(2), &stake(80, pub_key(0xa2))).expect("set");
        s.rollback(checkpoint);

        assert_eq!(s.root(), root_before);
        assert_eq!(s.get_balance(&addr(2), false), Currency::zero());
        assert_eq!(s.get_holder_by_validator(&pub_key(0xa2).address()), None);
        assert_eq!(s.top_stakes(10, None, false).len(), 1);
    }

    #[test]
    fn request_and_usage_dual_keys() {
        let mut s = store();
        let parcel_id = b"parcel-1";
        s.set_request(
            &addr(5),
            parcel_id,
            &Request {
                payment: Currency::from(10),
                dealer: None,
                dealer_fee: Currency::zero(),
                extra: Default::default(),
            },
        );
        assert!(s.get_request(&addr(5), parcel_id, false).is_some());
        let by_parcel = s.get_requests(parcel_id, false);
        assert_eq!(by_parcel.len(), 1);
        assert_eq!(by_parcel[0].buyer, addr(5));

        s.delete_request(&addr(5), parcel_id);
        assert!(s.get_request(&addr(5), parcel_id, false).is_none());
        assert!(s.get_requests(parcel_id, false).is_empty());
    }

    #[test]
    fn voting_power_adjustment_caps_total() {
        let mut s = store();
        let huge: Currency = "1000000000000000000000000000000".parse().expect("parse");
        s.set_unlocked_stake(
            &addr(1),
            &Stake {
                amount: huge.clone(),
                validator: pub_key(0xa1),
            },
        )
        .expect("set");
        s.set_unlocked_stake(
            &addr(2),
            &Stake {
                amount: huge,
                validator: pub_key(0xa2),
            },
        )
        .expect("set");

        let updates = s.validator_updates(10, false);
        assert_eq!(updates.len(), 2);
        let total: u64 = updates.iter().map(|(_, power)| power).sum();
        assert!(total <= MAX_TOTAL_VOTING_POWER);
        assert!(updates.iter().all(|(_, power)| *power > 0));
    }
}
