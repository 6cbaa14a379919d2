use amo_types::Address;
use num_bigint::BigUint;

use crate::kv::MemDb;

/// Counts per-validator missed signatures over a rolling window of blocks.
///
/// Each BeginBlock feeds the last-commit vote set in; when the window closes
/// (at the due height), every validator whose miss ratio reached the
/// threshold is reported lazy, the counters reset, and the next window
/// begins. Counters live in their own KV store so a restarted replica
/// resumes the window exactly; the due height is part of the persisted app
/// state.
pub struct LazinessCounter {
    db: MemDb,
    due: u64,
    window: u64,
    threshold: f64,
}

impl LazinessCounter {
    pub fn new(db: MemDb, due: u64, window: u64, threshold: f64) -> LazinessCounter {
        LazinessCounter {
            db,
            due,
            window,
            threshold,
        }
    }

    pub fn due(&self) -> u64 {
        self.due
    }

    /// Ingest one block's signing outcomes and return the validators found
    /// lazy, if the window closed at this height.
    pub fn investigate(&mut self, height: u64, votes: &[(Address, bool)]) -> Vec<Address> {
        if self.due == 0 {
            // First observed block opens the window.
            self.due = height + self.window - 1;
        }

        for (validator, signed) in votes {
            if !signed {
                let missed = self.missed(validator) + 1;
                self.db
                    .set(validator.as_bytes(), &missed.to_be_bytes());
            }
        }

        if height < self.due {
            return Vec::new();
        }

        let lazy = self
            .db
            .scan_prefix(&[], false)
            .into_iter()
            .filter_map(|(key, value)| {
                let validator = Address::from_slice(&key)?;
                let missed = u64::from_be_bytes(value.try_into().ok()?);
                ratio_reached(missed, self.window, self.threshold).then_some(validator)
            })
            .collect();

        for (key, _) in self.db.scan_prefix(&[], false) {
            self.db.delete(&key);
        }
        self.due += self.window;
        lazy
    }

    fn missed(&self, validator: &Address) -> u64 {
        self.db
            .get(validator.as_bytes())
            .and_then(|b| b.try_into().ok().map(u64::from_be_bytes))
            .unwrap_or(0)
    }
}

// missed / window >= threshold, compared exactly: the f64 threshold is
// expanded into mantissa * 2^exponent so no float rounding enters the
// replicated decision.
fn ratio_reached(missed: u64, window: u64, threshold: f64) -> bool {
    if !(threshold > 0.0) || !threshold.is_finite() {
        return true;
    }
    let bits = threshold.to_bits();
    let exponent_bits = ((bits >> 52) & 0x7ff) as i64;
    let fraction = bits & ((1u64 << 52) - 1);
    let (mantissa, exponent) = if exponent_bits == 0 {
        (fraction, -1074i64)
    } else {
        (fraction | (1u64 << 52), exponent_bits - 1075)
    };
    let mut lhs = BigUint::from(missed);
    let mut rhs = BigUint::from(window) * mantissa;
    if exponent >= 0 {
        rhs <<= exponent as u64;
    } else {
        lhs <<= (-exponent) as u64;
    }
    lhs >= rhs
}
