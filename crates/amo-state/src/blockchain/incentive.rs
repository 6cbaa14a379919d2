use amo_types::{Address, Currency};

use crate::store::Store;

/// Distribute the block's reward pool across the proposer's holder and its
/// delegators, weighted by `weight_validator` / `weight_delegator`.
///
/// The pool is `blk_reward + num_txs · tx_reward + fees`. Each delegator
/// share truncates toward zero and the proposer takes the residue, so the
/// pool is paid out exactly. Every payment is recorded in the incentive
/// history.
#[allow(clippy::too_many_arguments)]
pub fn distribute_incentive(
    store: &mut Store,
    weight_validator: u64,
    weight_delegator: u64,
    blk_reward: &Currency,
    tx_reward: &Currency,
    height: u64,
    num_delivered_txs: u64,
    staker: Option<&Address>,
    fee_accumulated: &Currency,
) {
    let mut pool = blk_reward + &tx_reward.mul_u64(num_delivered_txs);
    pool += fee_accumulated;
    if pool.is_zero() {
        return;
    }

    // An unresolvable proposer forfeits the block's pool.
    let Some(staker) = staker else {
        debug!(height, "no holder for block proposer; skipping incentive");
        return;
    };
    let Some(stake) = store.get_stake(staker, false) else {
        return;
    };

    let delegates = store.get_delegates_by_delegatee(staker, false);
    let mut weighted_sum = stake.amount.mul_u64(weight_validator);
    for delegate in &delegates {
        weighted_sum += &delegate.delegate.amount.mul_u64(weight_delegator);
    }
    if weighted_sum.is_zero() {
        return;
    }

    let mut subtotal = Currency::zero();
    for delegate in &delegates {
        let share = pool.mul_div(
            &delegate.delegate.amount.mul_u64(weight_delegator),
            &weighted_sum,
        );
        if share.is_zero() {
            continue;
        }
        subtotal += &share;
        let balance = store.get_balance(&delegate.delegator, false);
        store.set_balance(&delegate.delegator, &(&balance + &share));
        store.add_incentive_record(height, &delegate.delegator, &share);
    }

    // The proposer covers the truncation residue.
    let remainder = pool.saturating_sub(&subtotal);
    if remainder.is_zero() {
        return;
    }
    let balance = store.get_balance(staker, false);
    store.set_balance(staker, &(&balance + &remainder));
    store.add_incentive_record(height, staker, &remainder);
}
