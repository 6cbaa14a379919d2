use amo_types::{Address, Currency, Delegate, PubKey, Stake, Tx, TxCode};
use serde::Deserialize;

use super::{CheckResult, ExecuteResult, TxContext, abort, done, fail, ok, parse_payload};
use crate::store::Store;

#[derive(Deserialize)]
struct StakeParam {
    amount: Currency,
    validator: PubKey,
}

#[derive(Deserialize)]
struct WithdrawParam {
    amount: Currency,
}

#[derive(Deserialize)]
struct DelegateParam {
    to: Address,
    amount: Currency,
}

#[derive(Deserialize)]
struct RetractParam {
    amount: Currency,
}

pub fn check_stake(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<StakeParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

/// Convert balance into stake. The new stake enters locked for the
/// configured lockup period and joins the holder's existing records.
pub fn execute_stake(ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: StakeParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    if param.amount.is_zero() {
        return abort(TxCode::InvalidAmount);
    }
    if !param.amount.is_multiple_of(&ctx.config.min_staking_unit) {
        return abort(TxCode::ImproperStakingUnit);
    }
    let balance = store.get_balance(&tx.sender, false);
    let Some(balance) = balance.checked_sub(&param.amount) else {
        return abort(TxCode::NotEnoughBalance);
    };

    let lockup = ctx.config.lockup_period;
    if store.get_locked_stake(&tx.sender, lockup, false).is_some() {
        return abort(TxCode::HeightTaken);
    }
    let stake = Stake {
        amount: param.amount,
        validator: param.validator,
    };
    if let Err(code) = store.set_locked_stake(&tx.sender, &stake, lockup) {
        return abort(code);
    }
    store.set_balance(&tx.sender, &balance);
    done(Vec::new())
}

pub fn check_withdraw(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<WithdrawParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

/// Move stake back into balance. Only the unlocked record can be drawn from.
pub fn execute_withdraw(_ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: WithdrawParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    if param.amount.is_zero() {
        return abort(TxCode::InvalidAmount);
    }
    let Some(mut unlocked) = store.get_unlocked_stake(&tx.sender, false) else {
        return abort(TxCode::NoStake);
    };
    let Some(remaining) = unlocked.amount.checked_sub(&param.amount) else {
        // The rest of the holder's stake is still locked up.
        let locked = store.get_locked_stakes_with_height(&tx.sender, false);
        return abort(if locked.is_empty() {
            TxCode::ImproperStakeAmount
        } else {
            TxCode::StakeLocked
        });
    };
    unlocked.amount = remaining;
    if let Err(code) = store.set_unlocked_stake(&tx.sender, &unlocked) {
        return abort(code);
    }
    let balance = store.get_balance(&tx.sender, false);
    store.set_balance(&tx.sender, &(&balance + &param.amount));
    done(Vec::new())
}

pub fn check_delegate(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    let param: DelegateParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e),
    };
    if param.to == tx.sender {
        return fail(TxCode::SelfTransaction);
    }
    ok()
}

/// Move balance into a delegate record pointing at a staked holder. One
/// delegatee per delegator; stakers may not delegate.
pub fn execute_delegate(ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let (code, info) = check_delegate(ctx, tx);
    if code != TxCode::Ok {
        return (code, info, Vec::new());
    }
    let param: DelegateParam = parse_payload(tx).expect("payload validated by check");
    if param.amount.is_zero() {
        return abort(TxCode::InvalidAmount);
    }
    if store.get_stake(&tx.sender, false).is_some() {
        return abort(TxCode::PermissionDenied);
    }
    let delegate = match store.get_delegate(&tx.sender, false) {
        Some(existing) if existing.delegatee != param.to => {
            return abort(TxCode::MultipleDelegates);
        }
        Some(mut existing) => {
            existing.amount += &param.amount;
            existing
        }
        None => Delegate {
            delegatee: param.to,
            amount: param.amount.clone(),
        },
    };
    let balance = store.get_balance(&tx.sender, false);
    let Some(balance) = balance.checked_sub(&param.amount) else {
        return abort(TxCode::NotEnoughBalance);
    };
    if let Err(code) = store.set_delegate(&tx.sender, &delegate) {
        return abort(code);
    }
    store.set_balance(&tx.sender, &balance);
    done(Vec::new())
}

pub fn check_retract(_ctx: &TxContext<'_>, tx: &Tx) -> CheckResult {
    match parse_payload::<RetractParam>(tx) {
        Ok(_) => ok(),
        Err(e) => (TxCode::BadParam, e),
    }
}

pub fn execute_retract(_ctx: &TxContext<'_>, store: &mut Store, tx: &Tx) -> ExecuteResult {
    let param: RetractParam = match parse_payload(tx) {
        Ok(param) => param,
        Err(e) => return (TxCode::BadParam, e, Vec::new()),
    };
    if param.amount.is_zero() {
        return abort(TxCode::InvalidAmount);
    }
    let Some(mut delegate) = store.get_delegate(&tx.sender, false) else {
        return abort(TxCode::DelegateNotFound);
    };
    let Some(remaining) = delegate.amount.checked_sub(&param.amount) else {
        return abort(TxCode::InvalidAmount);
    };
    delegate.amount = remaining;
    if let Err(code) = store.set_delegate(&tx.sender, &delegate) {
        return abort(code);
    }
    let balance = store.get_balance(&tx.sender, false);
    store.set_balance(&tx.sender, &(&balance + &param.amount));
    done(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::tests::{ctx, env, tx_with};

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    fn stake_tx(sender: Address, amount: &str, validator: u8) -> Tx {
        tx_with(
            "stake",
            sender,
            &format!(
                r#"{{"amount":"{amount}","validator":"{}"}}"#,
                hex::encode([validator; 32])
            ),
        )
    }

    #[test]
    fn stake_locks_for_the_lockup_period() {
        let (mut store, config) = env();
        store.set_balance(&addr(1), &Currency::from(500));

        let (code, _, _) = execute_stake(&ctx(&config), &mut store, &stake_tx(addr(1), "300", 0xa1));
        assert_eq!(code, TxCode::Ok);
        assert_eq!(store.get_balance(&addr(1), false), Currency::from(200));
        assert_eq!(
            store
                .get_locked_stake(&addr(1), config.lockup_period, false)
                .expect("locked")
                .amount,
            Currency::from(300)
        );

        // the lockup slot is now taken for this block
        let (code, _, _) = execute_stake(&ctx(&config), &mut store, &stake_tx(addr(1), "100", 0xa1));
        assert_eq!(code, TxCode::HeightTaken);
    }

    #[test]
    fn stake_enforces_unit_and_balance() {
        let (mut store, config) = env();
        store.set_balance(&addr(1), &Currency::from(500));

        let (code, _, _) = execute_stake(&ctx(&config), &mut store, &stake_tx(addr(1), "150", 0xa1));
        assert_eq!(code, TxCode::ImproperStakingUnit);

        let (code, _, _) = execute_stake(&ctx(&config), &mut store, &stake_tx(addr(1), "600", 0xa1));
        assert_eq!(code, TxCode::NotEnoughBalance);

        let (code, _, _) = execute_stake(&ctx(&config), &mut store, &stake_tx(addr(1), "0", 0xa1));
        assert_eq!(code, TxCode::InvalidAmount);
    }

    #[test]
    fn stake_respects_validator_ownership() {
        let (mut store, config) = env();
        store.set_balance(&addr(1), &Currency::from(500));
        store.set_balance(&addr(2), &Currency::from(500));
        execute_stake(&ctx(&config), &mut store, &stake_tx(addr(1), "100", 0xa1));

        let (code, _, _) = execute_stake(&ctx(&config), &mut store, &stake_tx(addr(2), "100", 0xa1));
        assert_eq!(code, TxCode::PermissionDenied);
        assert_eq!(store.get_balance(&addr(2), false), Currency::from(500));
    }

    #[test]
    fn withdraw_from_unlocked_only() {
        let (mut store, config) = env();
        store
            .set_unlocked_stake(
                &addr(1),
                &Stake {
                    amount: Currency::from(100),
                    validator: PubKey([0xa1; 32]),
                },
            )
            .expect("stake");
        store
            .set_locked_stake(
                &addr(1),
                &Stake {
                    amount: Currency::from(50),
                    validator: PubKey([0xa1; 32]),
                },
                10,
            )
            .expect("lock");

        let tx = tx_with("withdraw", addr(1), r#"{"amount":"120"}"#);
        assert_eq!(execute_withdraw(&ctx(&config), &mut store, &tx).0, TxCode::StakeLocked);

        let tx = tx_with("withdraw", addr(1), r#"{"amount":"60"}"#);
        assert_eq!(execute_withdraw(&ctx(&config), &mut store, &tx).0, TxCode::Ok);
        assert_eq!(store.get_balance(&addr(1), false), Currency::from(60));
        assert_eq!(
            store.get_unlocked_stake(&addr(1), false).expect("stake").amount,
            Currency::from(40)
        );
    }

    #[test]
    fn withdraw_without_stake_or_beyond_total() {
        let (mut store, config) = env();
        let tx = tx_with("withdraw", addr(1), r#"{"amount":"10"}"#);
        assert_eq!(execute_withdraw(&ctx(&config), &mut store, &tx).0, TxCode::NoStake);

        store
            .set_unlocked_stake(
                &addr(1),
                &Stake {
                    amount: Currency::from(5),
                    validator: PubKey([0xa1; 32]),
                },
            )
            .expect("stake");
        assert_eq!(
            execute_withdraw(&ctx(&config), &mut store, &tx).0,
            TxCode::ImproperStakeAmount
        );
    }

    #[test]
    fn delegate_and_retract_roundtrip() {
        let (mut store, config) = env();
        store
            .set_unlocked_stake(
                &addr(1),
                &Stake {
                    amount: Currency::from(100),
                    validator: PubKey([0xa1; 32]),
                },
            )
            .expect("stake");
        store.set_balance(&addr(2), &Currency::from(80));

        let delegate = tx_with(
            "delegate",
            addr(2),
            &format!(r#"{{"to":"{}","amount":"30"}}"#, addr(1)),
        );
        assert_eq!(execute_delegate(&ctx(&config), &mut store, &delegate).0, TxCode::Ok);
        assert_eq!(store.get_balance(&addr(2), false), Currency::from(50));
        assert_eq!(
            store.get_eff_stake(&addr(1), false).expect("eff").amount,
            Currency::from(130)
        );

        // a second delegation to the same holder merges
        assert_eq!(execute_delegate(&ctx(&config), &mut store, &delegate).0, TxCode::Ok);
        assert_eq!(
            store.get_delegate(&addr(2), false).expect("delegate").amount,
            Currency::from(60)
        );

        let retract = tx_with("retract", addr(2), r#"{"amount":"60"}"#);
        assert_eq!(execute_retract(&ctx(&config), &mut store, &retract).0, TxCode::Ok);
        assert_eq!(store.get_balance(&addr(2), false), Currency::from(80));
        assert_eq!(store.get_delegate(&addr(2), false), None);

        assert_eq!(
            execute_retract(&ctx(&config), &mut store, &retract).0,
            TxCode::DelegateNotFound
        );
    }

    #[test]
    fn delegate_restrictions() {
        let (mut store, config) = env();
        for n in [1u8, 3] {
            store
                .set_unlocked_stake(
                    &addr(n),
                    &Stake {
                        amount: Currency::from(100),
                        validator: PubKey([0xa0 + n; 32]),
                    },
                )
                .expect("stake");
        }
        store.set_balance(&addr(2), &Currency::from(100));

        // a staker cannot delegate
        let from_staker = tx_with(
            "delegate",
            addr(1),
            &format!(r#"{{"to":"{}","amount":"10"}}"#, addr(3)),
        );
        assert_eq!(
            execute_delegate(&ctx(&config), &mut store, &from_staker).0,
            TxCode::PermissionDenied
        );

        // only one delegatee per delegator
        let first = tx_with(
            "delegate",
            addr(2),
            &format!(r#"{{"to":"{}","amount":"10"}}"#, addr(1)),
        );
        execute_delegate(&ctx(&config), &mut store, &first);
        let second = tx_with(
            "delegate",
            addr(2),
            &format!(r#"{{"to":"{}","amount":"10"}}"#, addr(3)),
        );
        assert_eq!(
            execute_delegate(&ctx(&config), &mut store, &second).0,
            TxCode::MultipleDelegates
        );

        // the delegatee must hold stake
        let to_unstaked = tx_with(
            "delegate",
            addr(4),
            &format!(r#"{{"to":"{}","amount":"10"}}"#, addr(5)),
        );
        store.set_balance(&addr(4), &Currency::from(100));
        assert_eq!(
            execute_delegate(&ctx(&config), &mut store, &to_unstaked).0,
            TxCode::NoStake
        );
    }
}
