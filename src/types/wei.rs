use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Token amount in wei. Arbitrary precision; serialized as a decimal string
/// because bid amounts routinely exceed `u64`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wei(BigUint);

impl Wei {
    const DECIMALS: usize = 18;

    pub fn zero() -> Self {
        Wei(BigUint::zero())
    }

    pub fn from_u128(value: u128) -> Self {
        Wei(BigUint::from(value))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn to_u128(&self) -> Option<u128> {
        self.0.to_u128()
    }

    /// Human readable ether amount, trailing zeros trimmed ("1.5", "0.01", "3")
    pub fn to_ether_string(&self) -> String {
        let digits = self.0.to_str_radix(10);
        let (whole, fraction) = if digits.len() > Self::DECIMALS {
            let split = digits.len() - Self::DECIMALS;
            (digits[..split].to_string(), digits[split..].to_string())
        } else {
            ("0".to_string(), format!("{:0>width$}", digits, width = Self::DECIMALS))
        };

        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            whole
        } else {
            format!("{}.{}", whole, fraction)
        }
    }
}

impl FromStr for Wei {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidAmount(s.to_string()));
        }
        BigUint::parse_bytes(trimmed.as_bytes(), 10)
            .map(Wei)
            .ok_or_else(|| Error::InvalidAmount(s.to_string()))
    }
}

impl Add<&Wei> for Wei {
    type Output = Wei;

    fn add(self, rhs: &Wei) -> Wei {
        Wei(self.0 + &rhs.0)
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Providers send amounts as either JSON strings or plain numbers
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Raw::Number(number) => Ok(Wei(BigUint::from(number))),
        }
    }
}
