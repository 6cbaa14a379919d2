use amo_types::{AppConfig, Currency, Draft, Tx, TxCode, Vote};
use serde::Deserialize;

use super::{CheckResult, ExecuteResult, TxContext, abort, done, ok, parse_payload};
use crate::store::Store;

#[derive(Deserialize)]
struct ProposeParam {
    draft_id: u32,
    config: AppConfig,
    deposit: Currency,
}

#[derive(Deserialize)]
struct VoteParam {
    draft_id: u32,
    approve: bool,
}

pub fn check_propose(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<ProposeParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

/// Open a draft carrying a candidate config. Only a current validator holder
/// may propose, drafts are numbered sequentially, one draft runs at a time,
/// and the deposit is escrowed until the vote closes.
pub fn execute_propose(ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: ProposeParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    if store
        .top_stakes(ctx.config.max_validators, Some(&tx.sender), false)
        .is_empty()
    {
        return abort(TxCode::PermissionDenied);
    }
    if param.draft_id != ctx.next_draft_id {
        return abort(TxCode::ImproperDraftId);
    }
    if store.get_draft(param.draft_id, false).is_some() {
        return abort(TxCode::ProposedDraft);
    }
    if ctx.next_draft_id > 1 {
        if let Some(previous) = store.get_draft(ctx.next_draft_id - 1, false) {
            if previous.open_count > 0 || previous.close_count > 0 || previous.apply_count > 0 {
                return abort(TxCode::DraftInProcess);
            }
        }
    }
    if param.deposit != ctx.config.draft_deposit {
        return abort(TxCode::ImproperDraftDeposit);
    }
    let balance = store.get_balance(&tx.sender, false);
    let Some(balance) = balance.checked_sub(&param.deposit) else {
        return abort(TxCode::NotEnoughBalance);
    };

    store.set_draft(
        param.draft_id,
        &Draft {
            proposer: tx.sender,
            config: param.config,
            deposit: param.deposit,
            open_count: ctx.config.draft_open_count,
            close_count: ctx.config.draft_close_count,
            apply_count: ctx.config.draft_apply_count,
            tally_quorum: Currency::zero(),
            tally_approve: Currency::zero(),
            tally_reject: Currency::zero(),
        },
    );
    store.set_balance(&tx.sender, &balance);
    done(Vec::new())
}

pub fn check_vote(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<VoteParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

/// Record a validator's vote on a draft whose open phase has completed and
/// whose voting phase is still running.
pub fn execute_vote(ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: VoteParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    if store
        .top_stakes(ctx.config.max_validators, Some(&tx.sender), false)
        .is_empty()
    {
        return abort(TxCode::PermissionDenied);
    }
    let Some(draft) = store.get_draft(param.draft_id, false) else {
        return abort(TxCode::ImproperDraftId);
    };
    if draft.proposer == tx.sender {
        return abort(TxCode::SelfTransaction);
    }
    if !(draft.open_count == 0 && draft.close_count > 0 && draft.apply_count > 0) {
        return abort(TxCode::DraftInProcess);
    }
    if store.get_vote(param.draft_id, &tx.sender, false).is_some() {
        return (TxCode::BadParam, "already voted".to_string(), Vec::new());
    }
    store.set_vote(
        param.draft_id,
        &tx.sender,
        &Vote {
            approve: param.approve,
            power: Currency::zero(),
        },
    );
    done(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use amo_types::{Address, PubKey, Stake};
    use crate::tx::tests::{ctx, env, tx_with};

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    fn staked(store: &mut Store, n: u8) {
        store
            .set_unlocked_stake(
                &addr(n),
                &Stake {
                    amount: Currency::from(1_000),
                    validator: PubKey([0xa0 + n; 32]),
                },
            )
            .expect("stake");
    }

    fn propose_tx(sender: Address, draft_id: u32, deposit: &str) -> Tx {
        tx_with(
            "propose",
            sender,
            &format!(r#"{{"draft_id":{draft_id},"config":{{"lockup_period":42}},"deposit":"{deposit}"}}"#),
        )
    }

    #[test]
    fn propose_escrows_deposit_and_opens_draft() {
        let (mut store, config) = env();
        staked(&mut store, 1);
        store.set_balance(&addr(1), &Currency::from(1_500));

        let (code, _, _) = execute_propose(&ctx(&config), &mut store, &propose_tx(addr(1), 1, "1000"));
        assert_eq!(code, TxCode::Ok);
        assert_eq!(store.get_balance(&addr(1), false), Currency::from(500));
        let draft = store.get_draft(1, false).expect("draft");
        assert_eq!(draft.proposer, addr(1));
        assert_eq!(draft.open_count, config.draft_open_count);
        assert_eq!(draft.config.lockup_period, 42);
    }

    #[test]
    fn propose_gatekeeping() {
        let (mut store, config) = env();
        staked(&mut store, 1);
        store.set_balance(&addr(1), &Currency::from(5_000));
        store.set_balance(&addr(2), &Currency::from(5_000));

        // non-validators may not propose
        let (code, _, _) = execute_propose(&ctx(&config), &mut store, &propose_tx(addr(2), 1, "1000"));
        assert_eq!(code, TxCode::PermissionDenied);

        // the draft id must be the next expected one
        let (code, _, _) = execute_propose(&ctx(&config), &mut store, &propose_tx(addr(1), 4, "1000"));
        assert_eq!(code, TxCode::ImproperDraftId);

        // the deposit is fixed by config
        let (code, _, _) = execute_propose(&ctx(&config), &mut store, &propose_tx(addr(1), 1, "999"));
        assert_eq!(code, TxCode::ImproperDraftDeposit);

        execute_propose(&ctx(&config), &mut store, &propose_tx(addr(1), 1, "1000"));
        let (code, _, _) = execute_propose(&ctx(&config), &mut store, &propose_tx(addr(1), 1, "1000"));
        assert_eq!(code, TxCode::ProposedDraft);

        // while draft 1 is live, draft 2 cannot open
        let mut next = ctx(&config);
        next.next_draft_id = 2;
        let (code, _, _) = execute_propose(&next, &mut store, &propose_tx(addr(1), 2, "1000"));
        assert_eq!(code, TxCode::DraftInProcess);
    }

    #[test]
    fn vote_requires_open_phase_complete() {
        let (mut store, config) = env();
        staked(&mut store, 1);
        staked(&mut store, 2);
        store.set_balance(&addr(1), &Currency::from(1_000));
        execute_propose(&ctx(&config), &mut store, &propose_tx(addr(1), 1, "1000"));

        let vote = tx_with("vote", addr(2), r#"{"draft_id":1,"approve":true}"#);
        // open_count is still 1: voting has not opened
        assert_eq!(execute_vote(&ctx(&config), &mut store, &vote).0, TxCode::DraftInProcess);

        crate::governance::process_draft_votes(&mut store, 1, 10, 0.3, 0.51, 0.2);
        assert_eq!(execute_vote(&ctx(&config), &mut store, &vote).0, TxCode::Ok);
        assert_eq!(
            execute_vote(&ctx(&config), &mut store, &vote).0,
            TxCode::BadParam // already voted
        );

        // the proposer's approval is implicit; voting again is refused
        let own = tx_with("vote", addr(1), r#"{"draft_id":1,"approve":true}"#);
        assert_eq!(execute_vote(&ctx(&config), &mut store, &own).0, TxCode::SelfTransaction);

        // votes on unknown drafts are refused
        let unknown = tx_with("vote", addr(2), r#"{"draft_id":9,"approve":true}"#);
        assert_eq!(execute_vote(&ctx(&config), &mut store, &unknown).0, TxCode::ImproperDraftId);
    }

    #[test]
    fn vote_requires_validator_rank() {
        let (mut store, config) = env();
        staked(&mut store, 1);
        let vote = tx_with("vote", addr(7), r#"{"draft_id":1,"approve":true}"#);
        assert_eq!(execute_vote(&ctx(&config), &mut store, &vote).0, TxCode::PermissionDenied);
    }
}
