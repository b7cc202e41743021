//! Expiry checks on unverified JWT claims
//!
//! The signature is never checked here. The `exp` claim is only used to
//! decide whether a cached token is worth reusing, never to trust it.

use crate::error::{Result, TinytokenError};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Tolerance for clock drift between this machine and the provider
pub const CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Check whether `token` has expired, using the current system time
///
/// # Errors
///
/// Returns `MalformedToken` if the token is not a three segment JWT with a
/// JSON object payload, or `MissingExpiryClaim` if it has no `exp` claim.
pub fn is_expired(token: &str) -> Result<bool> {
    is_expired_at(token, now_epoch_secs())
}

/// Check whether `token` is expired at `now` (seconds since the Unix epoch)
///
/// A token counts as expired once `now` passes `exp - CLOCK_SKEW`.
///
/// # Errors
///
/// See [`is_expired`].
pub fn is_expired_at(token: &str, now: i64) -> Result<bool> {
    let exp = expiry(token)?;
    let skew = i64::try_from(CLOCK_SKEW.as_secs()).unwrap_or(i64::MAX);
    Ok(now > exp.saturating_sub(skew))
}

/// Read the `exp` claim of `token`
///
/// # Errors
///
/// See [`is_expired`].
pub fn expiry(token: &str) -> Result<i64> {
    let segments: Vec<&str> = token.split('.').collect();
    let [_header, payload, _signature] = segments.as_slice() else {
        return Err(TinytokenError::malformed_token(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    };

    // Padding is optional in JWTs; accept it either way
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TinytokenError::malformed_token(format!("payload is not base64url: {e}")))?;

    let claims: serde_json::Map<String, Value> = serde_json::from_slice(&bytes)
        .map_err(|e| TinytokenError::malformed_token(format!("payload is not a JSON object: {e}")))?;

    match claims.get("exp") {
        None | Some(Value::Null) => Err(TinytokenError::MissingExpiryClaim),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| TinytokenError::malformed_token("exp claim is out of range")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| TinytokenError::malformed_token(format!("exp claim {s:?} is not numeric"))),
        Some(other) => Err(TinytokenError::malformed_token(format!(
            "exp claim has unexpected type: {other}"
        ))),
    }
}

pub(crate) fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
        .try_into()
        .unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_claims(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.c2lnbmF0dXJl")
    }

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_valid_for_an_hour_is_not_expired() {
        let token = token_with_claims(&serde_json::json!({"exp": NOW + 3600}));
        assert!(!is_expired_at(&token, NOW).unwrap());
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let token = token_with_claims(&serde_json::json!({"exp": NOW - 1}));
        assert!(is_expired_at(&token, NOW).unwrap());
    }

    #[test]
    fn test_within_skew_is_expired() {
        let token = token_with_claims(&serde_json::json!({"exp": NOW + 299}));
        assert!(is_expired_at(&token, NOW).unwrap());
    }

    #[test]
    fn test_exact_skew_boundary_is_not_expired() {
        let token = token_with_claims(&serde_json::json!({"exp": NOW + 300}));
        assert!(!is_expired_at(&token, NOW).unwrap());
        assert!(is_expired_at(&token, NOW + 1).unwrap());
    }

    #[test]
    fn test_wrong_segment_count_is_malformed() {
        for token in ["", "abc", "a.b", "a.b.c.d"] {
            let result = is_expired_at(token, NOW);
            assert!(
                matches!(result, Err(TinytokenError::MalformedToken(_))),
                "{token:?} -> {result:?}"
            );
        }
    }

    #[test]
    fn test_missing_exp_claim() {
        let token = token_with_claims(&serde_json::json!({"sub": "someone"}));
        assert!(matches!(
            is_expired_at(&token, NOW),
            Err(TinytokenError::MissingExpiryClaim)
        ));
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        // 20 bytes of JSON, so the padded encoding ends in '='
        let payload = base64::engine::general_purpose::URL_SAFE.encode(format!(r#"{{"exp":{}}} "#, NOW + 3600));
        let token = format!("{header}.{payload}.sig");
        assert!(!is_expired_at(&token, NOW).unwrap());
    }

    #[test]
    fn test_string_exp_is_accepted() {
        let token = token_with_claims(&serde_json::json!({"exp": (NOW + 3600).to_string()}));
        assert_eq!(expiry(&token).unwrap(), NOW + 3600);
    }

    #[test]
    fn test_non_json_payload_is_malformed() {
        let token = format!("e30.{}.sig", URL_SAFE_NO_PAD.encode("not json"));
        assert!(matches!(
            expiry(&token),
            Err(TinytokenError::MalformedToken(_))
        ));
    }
}
