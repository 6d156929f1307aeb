//! Stable deduplication keys for upstream transaction records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FIELD_SEPARATOR: char = '\u{1f}';
const FALLBACK_REFERENCE_CHARS: usize = 16;

/// How much a key can be trusted to identify a single logical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyQuality {
    /// Derived from the transaction and/or order hash.
    Primary,
    /// Derived from account, timestamp and a truncated reference.
    Fallback,
}

impl KeyQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyQuality::Primary => "primary",
            KeyQuality::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for KeyQuality {
    type Err = crate::errors::Error;

    fn from_str(value: &str) -> crate::errors::Result<Self> {
        match value {
            "primary" => Ok(KeyQuality::Primary),
            "fallback" => Ok(KeyQuality::Fallback),
            other => Err(crate::errors::Error::validation(format!(
                "unknown key quality '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub value: String,
    pub quality: KeyQuality,
}

fn digest(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            let mut buf = [0u8; 4];
            hasher.update(FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes());
        }
        hasher.update(part.as_bytes());
    }
    format!("{}:{:x}", prefix, hasher.finalize())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Derive the key for one record.
///
/// Primary keys hash `(account, transaction hash, order hash or "")` and are
/// used whenever either hash is present. Otherwise the key falls back to
/// `(account, timestamp, first 16 chars of the reference)`. Returns `None`
/// when neither form can be built.
pub fn derive_key(
    account_id: &str,
    transaction_hash: Option<&str>,
    order_hash: Option<&str>,
    occurred_at: Option<i64>,
    reference: Option<&str>,
) -> Option<IdempotencyKey> {
    let account = account_id.trim().to_ascii_lowercase();
    if account.is_empty() {
        return None;
    }

    let tx_hash = non_empty(transaction_hash);
    let order = non_empty(order_hash);
    if tx_hash.is_some() || order.is_some() {
        let tx_hash = tx_hash.unwrap_or_default().to_ascii_lowercase();
        let order = order.unwrap_or_default().to_ascii_lowercase();
        let value = digest("p", &[account.as_str(), tx_hash.as_str(), order.as_str()]);
        return Some(IdempotencyKey {
            value,
            quality: KeyQuality::Primary,
        });
    }

    let timestamp = occurred_at?;
    let reference = non_empty(reference)?;
    let truncated: String = reference.chars().take(FALLBACK_REFERENCE_CHARS).collect();
    let timestamp = timestamp.to_string();
    let value = digest(
        "f",
        &[account.as_str(), timestamp.as_str(), truncated.as_str()],
    );
    Some(IdempotencyKey {
        value,
        quality: KeyQuality::Fallback,
    })
}
