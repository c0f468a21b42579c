// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache key layout and value encodings.
//!
//! Keys are relative; the cache store adds its namespace prefix:
//!
//! ```text
//! last_username:{principal}            -> name bytes
//! last_nickname:{principal}:{scope}    -> nickname bytes | NULL_NAME_SENTINEL
//! last_seen:{principal}                -> i64 millis, little-endian   (legacy)
//! last_spoke:{principal}               -> i64 millis, little-endian   (legacy)
//! last_spoke:{principal}:{scope}       -> i64 millis, little-endian   (legacy)
//! ```
//!
//! The legacy presence keys predate the SQL presence tables; they are only
//! read by the migration job.

use crate::model::{PrincipalId, ScopeId, Timestamp, GLOBAL_SCOPE};

use super::traits::StorageError;

/// Cached stand-in for "known to have no value". Distinct from a missing key,
/// which means "not cached".
pub const NULL_NAME_SENTINEL: &[u8] =
    b"NoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNoneNone";

pub const LEGACY_LAST_SEEN_PREFIX: &str = "last_seen:";
pub const LEGACY_LAST_SPOKE_PREFIX: &str = "last_spoke:";

#[must_use]
pub fn name_key(principal: PrincipalId) -> String {
    format!("last_username:{}", principal)
}

#[must_use]
pub fn nickname_key(principal: PrincipalId, scope: ScopeId) -> String {
    format!("last_nickname:{}:{}", principal, scope)
}

#[must_use]
pub fn legacy_last_seen_key(principal: PrincipalId) -> String {
    format!("{}{}", LEGACY_LAST_SEEN_PREFIX, principal)
}

#[must_use]
pub fn legacy_last_spoke_key(principal: PrincipalId, scope: ScopeId) -> String {
    if scope == GLOBAL_SCOPE {
        format!("{}{}", LEGACY_LAST_SPOKE_PREFIX, principal)
    } else {
        format!("{}{}:{}", LEGACY_LAST_SPOKE_PREFIX, principal, scope)
    }
}

#[must_use]
pub fn encode_name(name: Option<&str>) -> Vec<u8> {
    match name {
        Some(name) => name.as_bytes().to_vec(),
        None => NULL_NAME_SENTINEL.to_vec(),
    }
}

/// Decode a cached name. The sentinel decodes to `None`.
pub fn decode_name(key: &str, bytes: &[u8]) -> Result<Option<String>, StorageError> {
    if bytes == NULL_NAME_SENTINEL {
        return Ok(None);
    }
    String::from_utf8(bytes.to_vec())
        .map(Some)
        .map_err(|e| StorageError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

#[must_use]
pub fn encode_timestamp(at: Timestamp) -> Vec<u8> {
    at.to_le_bytes().to_vec()
}

pub fn decode_timestamp(key: &str, bytes: &[u8]) -> Result<Timestamp, StorageError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| StorageError::Decode {
        key: key.to_string(),
        reason: format!("expected 8 bytes, got {}", bytes.len()),
    })?;
    Ok(Timestamp::from_le_bytes(raw))
}

/// A parsed legacy presence key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyKey {
    LastSeen(PrincipalId),
    LastSpoke(PrincipalId, ScopeId),
}

/// Parse a relative legacy key. Anything else (including the versioned name
/// keys) yields `None`.
#[must_use]
pub fn parse_legacy_key(key: &str) -> Option<LegacyKey> {
    if let Some(rest) = key.strip_prefix(LEGACY_LAST_SEEN_PREFIX) {
        return rest.parse().ok().map(LegacyKey::LastSeen);
    }

    let rest = key.strip_prefix(LEGACY_LAST_SPOKE_PREFIX)?;
    match rest.split_once(':') {
        None => rest.parse().ok().map(|p| LegacyKey::LastSpoke(p, GLOBAL_SCOPE)),
        Some((principal, scope)) => {
            let principal = principal.parse().ok()?;
            let scope: ScopeId = scope.parse().ok()?;
            // An explicit zero scope would alias the global key
            (scope != GLOBAL_SCOPE).then_some(LegacyKey::LastSpoke(principal, scope))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(name_key(42), "last_username:42");
        assert_eq!(nickname_key(42, 7), "last_nickname:42:7");
        assert_eq!(legacy_last_seen_key(42), "last_seen:42");
        assert_eq!(legacy_last_spoke_key(42, GLOBAL_SCOPE), "last_spoke:42");
        assert_eq!(legacy_last_spoke_key(42, 7), "last_spoke:42:7");
    }

    #[test]
    fn test_null_name_uses_sentinel() {
        assert_eq!(encode_name(None), NULL_NAME_SENTINEL);
        assert_eq!(decode_name("k", NULL_NAME_SENTINEL).unwrap(), None);
        assert_eq!(decode_name("k", &encode_name(Some("alice"))).unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_decode_name_rejects_invalid_utf8() {
        let err = decode_name("last_username:1", &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, StorageError::Decode { ref key, .. } if key == "last_username:1"));
    }

    #[test]
    fn test_timestamp_is_eight_le_bytes() {
        let bytes = encode_timestamp(1_700_000_000_123);
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes, 1_700_000_000_123i64.to_le_bytes());
        assert_eq!(decode_timestamp("k", &bytes).unwrap(), 1_700_000_000_123);
    }

    #[test]
    fn test_decode_timestamp_wrong_length() {
        assert!(decode_timestamp("k", b"1234").is_err());
        assert!(decode_timestamp("k", &[]).is_err());
    }

    #[test]
    fn test_parse_legacy_keys() {
        assert_eq!(parse_legacy_key("last_seen:42"), Some(LegacyKey::LastSeen(42)));
        assert_eq!(parse_legacy_key("last_spoke:42"), Some(LegacyKey::LastSpoke(42, GLOBAL_SCOPE)));
        assert_eq!(parse_legacy_key("last_spoke:42:7"), Some(LegacyKey::LastSpoke(42, 7)));
    }

    #[test]
    fn test_parse_legacy_keys_rejects_garbage() {
        assert_eq!(parse_legacy_key("last_seen:abc"), None);
        assert_eq!(parse_legacy_key("last_spoke:1:2:3"), None);
        assert_eq!(parse_legacy_key("last_spoke:1:0"), None);
        assert_eq!(parse_legacy_key("last_username:1"), None);
        assert_eq!(parse_legacy_key(""), None);
    }
}
