use amo_types::{Address, Currency};

use crate::store::Store;

/// Penalize the block's convicts: validators named in Byzantine evidence at
/// `penalty_ratio_m`, lazy validators at `penalty_ratio_l`.
///
/// Returns whether any stake or delegate changed (the caller then refreshes
/// the validator set).
pub fn penalize_convicts(
    store: &mut Store,
    evidence_validators: &[Address],
    lazy_validators: &[Address],
    weight_validator: u64,
    weight_delegator: u64,
    penalty_ratio_m: f64,
    penalty_ratio_l: f64,
) -> bool {
    let mut changed = false;
    for validator in evidence_validators {
        changed |= penalize(
            store,
            weight_validator,
            weight_delegator,
            validator,
            penalty_ratio_m,
            "evidence penalty",
        );
    }
    for validator in lazy_validators {
        changed |= penalize(
            store,
            weight_validator,
            weight_delegator,
            validator,
            penalty_ratio_l,
            "downtime penalty",
        );
    }
    changed
}

/// One conviction: `ratio` of the holder's effective stake, split across the
/// holder and its delegators by the same weighted proportions as incentives.
/// Delegator cuts go through the delegate store (clamped at zero); the
/// remainder is slashed from the holder's stake records.
fn penalize(
    store: &mut Store,
    weight_validator: u64,
    weight_delegator: u64,
    validator: &Address,
    ratio: f64,
    penalty_type: &str,
) -> bool {
    let mut changed = false;

    let Some(holder) = store.get_holder_by_validator(validator) else {
        warn!(validator = %validator, "no holder for convicted validator");
        return changed;
    };
    let Some(stake) = store.get_stake(&holder, false) else {
        warn!(holder = %holder, "no stake for convicted holder");
        return changed;
    };
    let Some(eff_stake) = store.get_eff_stake(&holder, false) else {
        return changed;
    };

    let penalty = eff_stake.amount.mul_ratio(ratio);
    if penalty.is_zero() {
        return changed;
    }

    let delegates = store.get_delegates_by_delegatee(&holder, false);
    let mut weighted_sum = stake.amount.mul_u64(weight_validator);
    for delegate in &delegates {
        weighted_sum += &delegate.delegate.amount.mul_u64(weight_delegator);
    }
    if weighted_sum.is_zero() {
        return changed;
    }

    // The merkle version equals the in-flight height until Commit advances it.
    let height = store.merkle_version();

    let mut subtotal = Currency::zero();
    for delegate in &delegates {
        let cut = penalty.mul_div(
            &delegate.delegate.amount.mul_u64(weight_delegator),
            &weighted_sum,
        );
        if cut.is_zero() {
            continue;
        }
        subtotal += &cut;
        let mut reduced = delegate.delegate.clone();
        reduced.amount = reduced.amount.saturating_sub(&cut);
        if let Err(code) = store.set_delegate(&delegate.delegator, &reduced) {
            warn!(delegator = %delegate.delegator, ?code, "could not apply delegate penalty");
            continue;
        }
        store.add_penalty_record(height, &delegate.delegator, &cut);
        debug!(penalty_type, delegator = %delegate.delegator, cut = %cut, "delegate penalized");
        changed = true;
    }

    let remainder = penalty.saturating_sub(&subtotal);
    if remainder.is_zero() {
        return changed;
    }
    store.slash_stakes(&holder, remainder.clone());
    store.add_penalty_record(height, &holder, &remainder);
    debug!(penalty_type, holder = %holder, penalty = %remainder, "validator penalized");
    true
}
