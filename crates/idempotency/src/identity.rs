//! Request identity headers and fingerprinting.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{BorrowerId, is_hex32};
use sha2::{Digest, Sha256};
use uuid::{Uuid, Variant};

use crate::error::{IdempotencyError, Result};

/// Header carrying the client-chosen request identifier.
pub const REQUEST_ID_HEADER: &str = "Ax-Request-Id";

/// Header carrying the client's send time.
pub const REQUEST_AT_HEADER: &str = "Ax-Request-At";

/// Header carrying the borrower the request acts for.
pub const BORROWER_ID_HEADER: &str = "Ax-Borrower-Id";

/// Prefix of every fingerprint key.
pub const KEY_PREFIX: &str = "idemp:ax";

/// Epoch values below this are seconds, anything else is milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Returns true for methods that never mutate state and skip coordination.
pub fn is_bypassed(method: &str) -> bool {
    ["GET", "HEAD", "OPTIONS"]
        .iter()
        .any(|safe| method.eq_ignore_ascii_case(safe))
}

/// Normalizes and validates a request id.
///
/// Accepts a hyphenated UUID (version 1 to 5, RFC 4122 variant) or 32
/// lowercase hex characters. Input is trimmed and lower-cased first.
pub fn parse_request_id(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(IdempotencyError::MissingHeader(REQUEST_ID_HEADER));
    }
    // Only the UUID form is case-insensitive; hex ids must already be lowercase.
    if is_hex32(raw) {
        Ok(raw.to_string())
    } else if is_hyphenated_uuid(raw) {
        Ok(raw.to_ascii_lowercase())
    } else {
        Err(IdempotencyError::InvalidHeader {
            header: REQUEST_ID_HEADER,
            reason: "must be a UUID or 32-char lowercase hex",
        })
    }
}

fn is_hyphenated_uuid(id: &str) -> bool {
    id.len() == 36
        && Uuid::try_parse(id).is_ok_and(|uuid| {
            matches!(uuid.get_version_num(), 1..=5) && uuid.get_variant() == Variant::RFC4122
        })
}

/// Parses a request timestamp.
///
/// Accepts epoch seconds, epoch milliseconds, or RFC 3339 with an explicit
/// offset or `Z`. Timestamps without a zone are rejected.
pub fn parse_request_at(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(IdempotencyError::MissingHeader(REQUEST_AT_HEADER));
    }

    let invalid = || IdempotencyError::InvalidHeader {
        header: REQUEST_AT_HEADER,
        reason: "must be epoch (s/ms) or RFC3339 with timezone",
    };

    if let Ok(epoch) = raw.parse::<i64>() {
        let parsed = if epoch < EPOCH_MILLIS_THRESHOLD {
            DateTime::from_timestamp(epoch, 0)
        } else {
            DateTime::from_timestamp_millis(epoch)
        };
        return parsed.ok_or_else(invalid);
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| invalid())
}

/// Rejects timestamps more than `max_skew` away from `now` in either direction.
pub fn check_clock_skew(at: DateTime<Utc>, now: DateTime<Utc>, max_skew: Duration) -> Result<()> {
    let window = TimeDelta::from_std(max_skew).unwrap_or(TimeDelta::MAX);
    if (now - at).abs() > window {
        return Err(IdempotencyError::ClockSkew {
            header: REQUEST_AT_HEADER,
            max_skew_secs: max_skew.as_secs(),
        });
    }
    Ok(())
}

/// Validates a borrower id header.
pub fn parse_borrower_id(raw: &str) -> Result<BorrowerId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(IdempotencyError::MissingHeader(BORROWER_ID_HEADER));
    }
    BorrowerId::parse(raw).map_err(|_| IdempotencyError::InvalidHeader {
        header: BORROWER_ID_HEADER,
        reason: "must be 32-char lowercase hex",
    })
}

/// Returns the lowercase hex SHA-256 of the raw request body.
pub fn hash_body(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// The validated identity of a mutating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub request_id: String,
    pub request_at: DateTime<Utc>,
    pub borrower_id: BorrowerId,
}

impl RequestIdentity {
    /// Validates the three identity header values.
    ///
    /// Each header is checked on its own and the first failure is returned.
    pub fn parse(
        request_id: Option<&str>,
        request_at: Option<&str>,
        borrower_id: Option<&str>,
        now: DateTime<Utc>,
        max_skew: Duration,
    ) -> Result<Self> {
        let request_id = parse_request_id(request_id.unwrap_or_default())?;
        let request_at = parse_request_at(request_at.unwrap_or_default())?;
        check_clock_skew(request_at, now, max_skew)?;
        let borrower_id = parse_borrower_id(borrower_id.unwrap_or_default())?;

        Ok(Self {
            request_id,
            request_at,
            borrower_id,
        })
    }

    /// Builds the coordination key for this request.
    ///
    /// `route` must be the matched route template, never the expanded path,
    /// so that retries against the same resource share a key.
    pub fn fingerprint(&self, method: &str, route: &str) -> String {
        format!(
            "{KEY_PREFIX}:{}:{route}:{}:{}",
            method.to_ascii_lowercase(),
            self.borrower_id,
            self.request_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKEW: Duration = Duration::from_secs(600);

    #[test]
    fn safe_methods_bypass() {
        assert!(is_bypassed("GET"));
        assert!(is_bypassed("head"));
        assert!(is_bypassed("OPTIONS"));
        assert!(!is_bypassed("POST"));
        assert!(!is_bypassed("DELETE"));
    }

    #[test]
    fn request_id_accepts_uuid_and_hex32() {
        assert_eq!(
            parse_request_id("  3F2504E0-4F89-41D3-9A0C-0305E82C3301 ").unwrap(),
            "3f2504e0-4f89-41d3-9a0c-0305e82c3301"
        );
        assert_eq!(parse_request_id(&"a".repeat(32)).unwrap(), "a".repeat(32));
    }

    #[test]
    fn uppercase_hex_request_id_is_rejected() {
        for raw in ["A".repeat(32), format!("{}F", "0".repeat(31))] {
            assert!(matches!(
                parse_request_id(&raw),
                Err(IdempotencyError::InvalidHeader {
                    header: REQUEST_ID_HEADER,
                    ..
                })
            ));
        }
    }

    #[test]
    fn request_id_rejects_bad_versions_and_variants() {
        // version 0
        assert!(parse_request_id("3f2504e0-4f89-01d3-9a0c-0305e82c3301").is_err());
        // version 7
        assert!(parse_request_id("3f2504e0-4f89-71d3-9a0c-0305e82c3301").is_err());
        // microsoft variant
        assert!(parse_request_id("3f2504e0-4f89-41d3-ca0c-0305e82c3301").is_err());
        assert!(parse_request_id("{3f2504e0-4f89-41d3-9a0c-0305e82c3301}").is_err());
        assert!(parse_request_id("NOT-VALID").is_err());
    }

    #[test]
    fn blank_request_id_is_missing() {
        assert!(matches!(
            parse_request_id("   "),
            Err(IdempotencyError::MissingHeader(REQUEST_ID_HEADER))
        ));
    }

    #[test]
    fn request_at_epoch_units() {
        let secs = parse_request_at("1736123456").unwrap();
        assert_eq!(secs.timestamp(), 1_736_123_456);

        let millis = parse_request_at("1736123456789").unwrap();
        assert_eq!(millis.timestamp_millis(), 1_736_123_456_789);

        let boundary = parse_request_at("1000000000000").unwrap();
        assert_eq!(boundary.timestamp_millis(), 1_000_000_000_000);
    }

    #[test]
    fn request_at_requires_zone() {
        let offset = parse_request_at("2025-09-05T10:00:00+07:00").unwrap();
        assert_eq!(offset.to_rfc3339(), "2025-09-05T03:00:00+00:00");
        assert!(parse_request_at("2025-09-05T10:00:00.123Z").is_ok());

        assert!(parse_request_at("2025-09-05T10:00:00").is_err());
        assert!(parse_request_at("not-a-time").is_err());
    }

    #[test]
    fn skew_window_is_symmetric() {
        let now = Utc::now();
        assert!(check_clock_skew(now - TimeDelta::minutes(9), now, SKEW).is_ok());
        assert!(check_clock_skew(now + TimeDelta::minutes(9), now, SKEW).is_ok());
        assert!(check_clock_skew(now - TimeDelta::minutes(11), now, SKEW).is_err());
        assert!(check_clock_skew(now + TimeDelta::minutes(11), now, SKEW).is_err());
    }

    #[test]
    fn borrower_id_must_be_hex32() {
        assert!(parse_borrower_id(&"b".repeat(32)).is_ok());
        assert!(matches!(
            parse_borrower_id("not32hex"),
            Err(IdempotencyError::InvalidHeader {
                header: BORROWER_ID_HEADER,
                ..
            })
        ));
    }

    #[test]
    fn identity_reports_first_failing_header() {
        let now = Utc::now();
        let at = now.to_rfc3339();
        let borrower = "b".repeat(32);

        let err =
            RequestIdentity::parse(None, Some(&at), Some(&borrower), now, SKEW).unwrap_err();
        assert!(matches!(err, IdempotencyError::MissingHeader(REQUEST_ID_HEADER)));

        let err = RequestIdentity::parse(Some(&"a".repeat(32)), Some(&at), None, now, SKEW)
            .unwrap_err();
        assert!(matches!(err, IdempotencyError::MissingHeader(BORROWER_ID_HEADER)));

        let stale = (now - TimeDelta::minutes(11)).to_rfc3339();
        let err = RequestIdentity::parse(
            Some(&"a".repeat(32)),
            Some(&stale),
            Some(&borrower),
            now,
            SKEW,
        )
        .unwrap_err();
        assert!(matches!(err, IdempotencyError::ClockSkew { .. }));
    }

    #[test]
    fn fingerprint_uses_route_template() {
        let identity = RequestIdentity {
            request_id: "a".repeat(32),
            request_at: Utc::now(),
            borrower_id: BorrowerId::parse("b".repeat(32)).unwrap(),
        };

        assert_eq!(
            identity.fingerprint("POST", "/loans/{loan_id}/approve"),
            format!(
                "idemp:ax:post:/loans/{{loan_id}}/approve:{}:{}",
                "b".repeat(32),
                "a".repeat(32)
            )
        );
    }

    #[test]
    fn body_hash_is_sha256_hex() {
        assert_eq!(
            hash_body(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(hash_body(b"{\"a\":1}"), hash_body(b"{\"a\":2}"));
    }
}
