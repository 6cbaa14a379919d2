//! The draft lifecycle automaton. Exactly one of a draft's three phase
//! counters decrements per block, in the order open → close → apply. The
//! close→apply boundary freezes the tallies and settles the deposit; the
//! apply boundary applies the draft's config if quorum and pass thresholds
//! hold.

use amo_types::Currency;

use crate::store::Store;

pub fn process_draft_votes(
    store: &mut Store,
    latest_draft_id: u32,
    max_validators: u64,
    quorum_rate: f64,
    pass_rate: f64,
    refund_rate: f64,
) {
    let Some(mut draft) = store.get_draft(latest_draft_id, false) else {
        return;
    };

    // Ignore already-applied drafts.
    if draft.open_count == 0 && draft.close_count == 0 && draft.apply_count == 0 {
        return;
    }

    let mut vote_just_closed = false;
    let mut apply_config = false;
    if draft.open_count > 0 {
        draft.open_count -= 1;
    } else if draft.close_count > 0 {
        draft.close_count -= 1;
        vote_just_closed = draft.close_count == 0;
    } else if draft.apply_count > 0 {
        draft.apply_count -= 1;
        apply_config = draft.apply_count == 0;
    }

    if vote_just_closed {
        // Freeze the quorum against the current validator set's total
        // effective stake.
        let mut total_eff = Currency::zero();
        for stake in store.top_stakes(max_validators, None, false) {
            let Some(holder) = store.get_holder_by_validator(&stake.validator.address()) else {
                continue;
            };
            if let Some(eff) = store.get_eff_stake(&holder, false) {
                total_eff += &eff.amount;
            }
        }
        draft.tally_quorum = total_eff.mul_ratio(quorum_rate);

        // The proposer counts as an implicit approval.
        if let Some(eff) = store.get_eff_stake(&draft.proposer, false) {
            draft.tally_approve += &eff.amount;
        }

        for info in store.get_votes(latest_draft_id, false) {
            // Voters who dropped out of the validator set lose their vote.
            if store.top_stakes(max_validators, Some(&info.voter), false).is_empty() {
                store.delete_vote(latest_draft_id, &info.voter);
                continue;
            }
            let Some(eff) = store.get_eff_stake(&info.voter, false) else {
                continue;
            };
            let mut vote = info.vote.clone();
            vote.power = eff.amount.clone();
            store.set_vote(latest_draft_id, &info.voter, &vote);
            if vote.approve {
                draft.tally_approve += &eff.amount;
            } else {
                draft.tally_reject += &eff.amount;
            }
        }

        let total_tally = &draft.tally_approve + &draft.tally_reject;
        let refund = total_tally.mul_ratio(refund_rate);
        if draft.tally_approve > refund {
            // Return the full deposit to the proposer.
            let balance = store.get_balance(&draft.proposer, false);
            store.set_balance(&draft.proposer, &(&balance + &draft.deposit));
        } else {
            // Split the deposit equally among the surviving voters.
            let votes = store.get_votes(latest_draft_id, false);
            if !votes.is_empty() {
                let split = draft.deposit.div_floor(votes.len() as u64);
                for info in votes {
                    let balance = store.get_balance(&info.voter, false);
                    store.set_balance(&info.voter, &(&balance + &split));
                }
            }
        }
    }

    store.set_draft(latest_draft_id, &draft);

    if apply_config {
        let total_tally = &draft.tally_approve + &draft.tally_reject;
        if draft.tally_quorum > total_tally {
            debug!(draft_id = latest_draft_id, "draft dropped: quorum not reached");
            return;
        }
        let pass = total_tally.mul_ratio(pass_rate);
        if pass > draft.tally_approve {
            debug!(draft_id = latest_draft_id, "draft dropped: pass rate not reached");
            return;
        }
        let config = serde_json::to_vec(&draft.config).expect("config serializes infallibly");
        store.set_app_config(&config);
        info!(draft_id = latest_draft_id, "draft config applied");
    }
}
