//! A decimal-string newtype for timestamps that must survive JSON without losing precision.
//!
//! The deadline that crosses the wire in a [`crate::types::PaymentPayload`] is carried as a
//! decimal string rather than a JSON number, so it never round-trips through a 53-bit-precision
//! float. The cap and nonce fields follow the same convention but are threaded through this crate
//! as plain `String`s, since they pass straight from a signing function to the wire format without
//! any arithmetic of their own.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, SystemTimeError};

/// A Unix timestamp in seconds, serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Eq, Ord)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    pub fn try_now() -> Result<Self, SystemTimeError> {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        Ok(Self(secs))
    }

    pub fn seconds_since_epoch(&self) -> u64 {
        self.0
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixTimestamp(ts))
    }
}

impl From<UnixTimestamp> for U256 {
    fn from(value: UnixTimestamp) -> Self {
        U256::from(value.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_timestamp_round_trips_through_json_as_a_string() {
        let ts = UnixTimestamp(1_734_000_000);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1734000000\"");
        let back: UnixTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
