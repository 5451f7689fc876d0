use chrono::{DateTime, Utc};

use crate::error::Error;

/// Timestamps are persisted as unix milliseconds so that ordering in SQL is numeric.
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::corrupt(format!("timestamp out of range: {ms}")))
}

/// Serde adapter encoding raw payload bytes as standard base64.
pub mod base64_bytes {
    use base64::{prelude::BASE64_STANDARD, Engine};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_keep_ordering() {
        let a = Utc::now();
        let b = a + chrono::TimeDelta::milliseconds(1);
        assert!(to_millis(a) < to_millis(b));
        assert_eq!(from_millis(to_millis(a)).unwrap(), from_millis(to_millis(a)).unwrap());
    }
}
