//! `serde(with = ...)` adapters for durations that servers express as whole seconds or
//! milliseconds. Values that fit an `int32` are written as one, larger ones as an `int64`.
//! Negative values read back as unset.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

fn serialize_int<S: Serializer>(value: Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
    let Some(value) = value else {
        return serializer.serialize_none();
    };
    match i32::try_from(value) {
        Ok(small) => serializer.serialize_i32(small),
        Err(_) => serializer.serialize_i64(i64::try_from(value).unwrap_or(i64::MAX)),
    }
}

fn deserialize_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(Option::<i64>::deserialize(deserializer)?.and_then(|value| u64::try_from(value).ok()))
}

pub(crate) mod duration_option_as_int_seconds {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serialize_int(value.map(|d| u128::from(d.as_secs())), serializer)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(deserialize_int(deserializer)?.map(Duration::from_secs))
    }
}

pub(crate) mod duration_option_as_int_millis {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serialize_int(value.map(|d| d.as_millis()), serializer)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(deserialize_int(deserializer)?.map(Duration::from_millis))
    }
}
