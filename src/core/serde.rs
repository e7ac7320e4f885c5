use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Configuration durations are written as fractional seconds, e.g. `0.25`
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Reads fractional seconds; negative and non-finite values are rejected
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    seconds(f64::deserialize(deserializer)?)
}

fn seconds<E: serde::de::Error>(secs: f64) -> Result<Duration, E> {
    Duration::try_from_secs_f64(secs).map_err(|_| E::custom(format!("invalid duration: {}", secs)))
}

/// Serializes an optional Duration as seconds, `null` when unset
pub fn serialize_opt_duration<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.map(|d| d.as_secs_f64()).serialize(serializer)
}

/// Deserializes an optional Duration from seconds
pub fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer)?.map(seconds::<D::Error>).transpose()
}
