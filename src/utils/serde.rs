/*!
 * Serde helpers for runbook documents.
 *
 * Runbooks are hand-edited YAML, so durations are accepted either as numbers or
 * as quoted strings.
 */

use serde::{Deserialize, Deserializer};

/// Deserialize an optional non-negative whole number of seconds.
///
/// Accepts an integer, a float (truncated), a numeric string, or null/missing.
///
/// ```yaml
/// timeout_secs: 900
/// timeout_secs: "900"
/// timeout_secs: 900.5   # truncated to 900
/// ```
pub fn deserialize_optional_seconds<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::Number(n)) => {
            if let Some(u) = n.as_u64() {
                Ok(Some(u))
            } else if let Some(f) = n.as_f64().filter(|f| *f >= 0.0) {
                Ok(Some(f as u64))
            } else {
                Err(D::Error::custom(format!("Invalid number of seconds: {n}")))
            }
        }
        Some(serde_yaml::Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("Cannot parse '{s}' as seconds"))),
        Some(other) => Err(D::Error::custom(format!(
            "Expected number of seconds, found: {other:?}"
        ))),
    }
}
