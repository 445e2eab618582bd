//! Sweep request wire format
//!
//! Producers publish one of two JSON shapes:
//!
//! ```text
//! {"address": "T...", "token": "USDT"}
//! [{"network": "tron-usdt"}, {"address": "T..."}]
//! ```
//!
//! Both decode into a [`SweepRequest`]. Re-queued and deferred messages are
//! always written back in the flat shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One address+token pair to sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRequest {
    pub address: String,
    /// Token symbol; empty or the native symbol means a native sweep
    #[serde(default)]
    pub token: String,
}

#[derive(Deserialize)]
struct TupleHead {
    network: String,
}

#[derive(Deserialize)]
struct TupleBody {
    address: String,
}

impl SweepRequest {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
        }
    }

    /// Decode a queue message body
    pub fn decode(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| Error::Decode(format!("invalid JSON: {}", e)))?;

        match value {
            Value::Object(_) => {
                let request: SweepRequest = serde_json::from_value(value)
                    .map_err(|e| Error::Decode(format!("invalid flat message: {}", e)))?;
                if request.address.is_empty() {
                    return Err(Error::Decode("empty address".to_string()));
                }
                Ok(request)
            }
            Value::Array(items) if items.len() == 2 => {
                let mut items = items.into_iter();
                let (head, body) = match (items.next(), items.next()) {
                    (Some(head), Some(body)) => (head, body),
                    _ => return Err(Error::Decode("expected [head, body]".to_string())),
                };
                let head: TupleHead = serde_json::from_value(head)
                    .map_err(|e| Error::Decode(format!("invalid message head: {}", e)))?;
                let body: TupleBody = serde_json::from_value(body)
                    .map_err(|e| Error::Decode(format!("invalid message body: {}", e)))?;
                let token = head.network.split('-').nth(1).ok_or_else(|| {
                    Error::Decode(format!("network without token segment: {}", head.network))
                })?;
                if body.address.is_empty() {
                    return Err(Error::Decode("empty address".to_string()));
                }
                Ok(Self::new(body.address, token))
            }
            other => Err(Error::Decode(format!(
                "unsupported message shape: {}",
                truncate(&other.to_string(), 100)
            ))),
        }
    }

    /// Encode in the flat shape used for re-queue and deferred storage
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
