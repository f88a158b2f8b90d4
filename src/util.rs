//! Small shared helpers: key validation and time conversion.
//!
//! Key-validation surface is common to every entry point per spec.md §6:
//! empty or whitespace-only keys and names are rejected with
//! invalid-argument, and callers are not required to pre-sanitize.

use chrono::{DateTime, Utc};

use crate::error::{RateLimitError, Result};

/// Reject an empty or whitespace-only key/name.
pub fn validate_non_blank(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RateLimitError::invalid_argument(format!(
            "{what} must not be empty or blank"
        )));
    }
    Ok(())
}

/// Reject `permits < 1`.
pub fn validate_permits(permits: u64) -> Result<()> {
    if permits < 1 {
        return Err(RateLimitError::invalid_argument(
            "permits must be greater than or equal to 1",
        ));
    }
    Ok(())
}

/// The current instant, as used for all algorithm state recalculation.
///
/// Algorithm state is persisted as wall-clock instants (spec.md §6 requires
/// an ISO-8601 field that round-trips through a shared store across
/// processes), so `Utc::now()` — not `std::time::Instant` — is the source
/// of truth here. Only cancellation/deadline handling uses `Instant`, since
/// deadlines are always local to the calling process.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_key() {
        assert!(validate_non_blank("", "key").is_err());
        assert!(validate_non_blank("   ", "key").is_err());
        assert!(validate_non_blank("user:1", "key").is_ok());
    }

    #[test]
    fn rejects_zero_permits() {
        assert!(validate_permits(0).is_err());
        assert!(validate_permits(1).is_ok());
    }
}
