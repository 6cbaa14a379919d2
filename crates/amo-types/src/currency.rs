use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// An arbitrary-precision non-negative coin amount.
///
/// Serialized as a canonical decimal string in JSON (no leading zeros, no
/// scientific notation), and as a 32-byte big-endian fixed-width integer when
/// used inside ordering keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Currency(BigUint);

impl Currency {
    pub fn zero() -> Currency {
        Currency(BigUint::default())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    pub fn from_key_bytes(b: &[u8]) -> Currency {
        Currency(BigUint::from_bytes_be(b))
    }

    /// Fixed-width big-endian form for ordered index keys. Amounts are bounded
    /// by the coin supply and always fit 256 bits.
    pub fn to_key_bytes(&self) -> [u8; 32] {
        let b = self.0.to_bytes_be();
        assert!(b.len() <= 32, "currency exceeds 256 bits");
        let mut key = [0u8; 32];
        key[32 - b.len()..].copy_from_slice(&b);
        key
    }

    pub fn checked_sub(&self, other: &Currency) -> Option<Currency> {
        if self.0 >= other.0 {
            Some(Currency(&self.0 - &other.0))
        } else {
            None
        }
    }

    pub fn saturating_sub(&self, other: &Currency) -> Currency {
        self.checked_sub(other).unwrap_or_default()
    }

    /// `self × ratio`, truncated toward zero.
    ///
    /// The f64 is expanded exactly into mantissa × 2^exponent, so the result
    /// is the floor of the exact product and identical on every replica.
    pub fn mul_ratio(&self, ratio: f64) -> Currency {
        if !(ratio > 0.0) || !ratio.is_finite() {
            return Currency::zero();
        }
        let bits = ratio.to_bits();
        let exponent_bits = ((bits >> 52) & 0x7ff) as i64;
        let fraction = bits & ((1u64 << 52) - 1);
        let (mantissa, exponent) = if exponent_bits == 0 {
            (fraction, -1074i64)
        } else {
            (fraction | (1u64 << 52), exponent_bits - 1075)
        };
        let product = &self.0 * mantissa;
        Currency(if exponent >= 0 {
            product << exponent as u64
        } else {
            product >> (-exponent) as u64
        })
    }

    /// `self × (num / den)`, truncated toward zero. `den` must be non-zero.
    pub fn mul_div(&self, num: &Currency, den: &Currency) -> Currency {
        assert!(!den.is_zero(), "division by zero");
        Currency(&self.0 * &num.0 / &den.0)
    }

    pub fn div_floor(&self, n: u64) -> Currency {
        assert!(n != 0, "division by zero");
        Currency(&self.0 / BigUint::from(n))
    }

    pub fn mul_u64(&self, n: u64) -> Currency {
        Currency(&self.0 * BigUint::from(n))
    }

    pub fn shr(&self, bits: u64) -> Currency {
        Currency(&self.0 >> bits)
    }

    /// Whether `self` is a whole number of `unit`s. A zero unit divides
    /// everything.
    pub fn is_multiple_of(&self, unit: &Currency) -> bool {
        unit.is_zero() || (&self.0 % &unit.0) == num_bigint::BigUint::default()
    }

    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(&self.0).ok()
    }
}

impl From<u64> for Currency {
    fn from(v: u64) -> Self {
        Currency(BigUint::from(v))
    }
}

impl Add<&Currency> for &Currency {
    type Output = Currency;

    fn add(self, other: &Currency) -> Currency {
        Currency(&self.0 + &other.0)
    }
}

impl AddAssign<&Currency> for Currency {
    fn add_assign(&mut self, other: &Currency) {
        self.0 += &other.0;
    }
}

impl FromStr for Currency {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Currency(BigUint::from_str(s)?))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Currency::from_str(&s).map_err(de::Error::custom)
    }
}
