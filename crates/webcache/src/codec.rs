//! JSON text codec between caller values and adapter strings.
//!
//! Both directions swallow failures: the caller sees a skipped write or a
//! missing value, and the reason is logged.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

pub(crate) fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(error) => {
            warn!(key, %error, "value is not serializable, write skipped");
            None
        }
    }
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, text: &str) -> Option<T> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(key, %error, "stored content is not valid JSON for this type");
            None
        }
    }
}
