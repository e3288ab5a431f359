//! HTTP failure classification, shared by the channels.
//!
//! The platform services distinguish "try again later" from "this recipient
//! is gone"; the dispatcher's retry policy keys off that distinction.

use raceday_core::error::DeliveryError;

/// Classify a non-success HTTP status into a delivery error.
pub fn classify_status(status: u16, context: &str) -> DeliveryError {
    match status {
        // Rate limits and request timeouts clear up on their own.
        408 | 429 => DeliveryError::transient(format!("{context}: HTTP {status}")),
        // Recipient unreachable, blocked, or gone — retrying cannot help.
        403 | 404 | 410 => DeliveryError::permanent(format!("{context}: HTTP {status}")),
        s if s >= 500 => DeliveryError::transient(format!("{context}: HTTP {s}")),
        s => DeliveryError::permanent(format!("{context}: HTTP {s}")),
    }
}

/// A transport-level failure (connect, DNS, timeout) is always transient.
pub fn classify_transport(err: &reqwest::Error, context: &str) -> DeliveryError {
    DeliveryError::transient(format!("{context}: {err}"))
}
