//! `utils` shim: Rust hostcalls behind the script-facing `utils` object.
//!
//! Registers native functions on the QuickJS global object that provide MD5,
//! HMAC-SHA256, URL-safe base64 and date formatting. The prelude wraps them
//! into `utils.md5`, `utils.hmacSha256`, `utils.base64UrlSafe` and
//! `utils.formatDateTime`.

use std::fmt::Write as _;

use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use hmac::Mac;
use md5::Md5;
use rquickjs::prelude::Func;
use sha2::{Digest, Sha256};

use crate::connectors::{HostCallError, host_result};

/// Register all utility hostcalls on the QuickJS global object.
pub fn register_utility_hostcalls(global: &rquickjs::Object<'_>) -> rquickjs::Result<()> {
    // __extscript_md5_native(data) -> hex digest
    global.set(
        "__extscript_md5_native",
        Func::from(|data: String| -> String { md5_hex(&data) }),
    )?;
    // __extscript_hmac_sha256_native(key, data) -> hex digest
    global.set(
        "__extscript_hmac_sha256_native",
        Func::from(|key: String, data: String| -> String { hmac_sha256_hex(&key, &data) }),
    )?;
    // __extscript_base64url_native(data) -> padded URL-safe base64
    global.set(
        "__extscript_base64url_native",
        Func::from(|data: String| -> String {
            base64::engine::general_purpose::URL_SAFE.encode(data.as_bytes())
        }),
    )?;
    // __extscript_format_datetime_native(iso, pattern, utc) -> envelope
    global.set(
        "__extscript_format_datetime_native",
        Func::from(|iso: String, pattern: String, utc: bool| -> String {
            host_result(
                format_date_time(&iso, &pattern, utc)
                    .map(serde_json::Value::String)
                    .map_err(HostCallError::invalid_request),
            )
        }),
    )?;
    Ok(())
}

pub fn md5_hex(data: &str) -> String {
    let mut h = Md5::new();
    h.update(data.as_bytes());
    hex_lower(&h.finalize())
}

pub fn sha256_hex(data: &str) -> String {
    hex_lower(&Sha256::digest(data.as_bytes()))
}

pub fn hmac_sha256_hex(key: &str, data: &str) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let Ok(mut mac) = hmac::Hmac::<Sha256>::new_from_slice(key.as_bytes()) else {
        return String::new();
    };
    mac.update(data.as_bytes());
    hex_lower(&mac.finalize().into_bytes())
}

/// Format an ISO-8601 timestamp with a strftime-style pattern.
///
/// Accepts RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS` (treated as UTC)
/// and bare dates. With `utc` the instant is converted to UTC before
/// formatting; otherwise its own offset is kept.
pub fn format_date_time(iso: &str, pattern: &str, utc: bool) -> Result<String, String> {
    let parsed = parse_timestamp(iso.trim())
        .ok_or_else(|| format!("unrecognized timestamp '{iso}'"))?;
    let mut out = String::new();
    let written = if utc {
        write!(out, "{}", parsed.with_timezone(&Utc).format(pattern))
    } else {
        write!(out, "{}", parsed.format(pattern))
    };
    written.map_err(|_| format!("invalid date pattern '{pattern}'"))?;
    Ok(out)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed);
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;
    Some(naive.and_utc().fixed_offset())
}

/// Convert bytes to lowercase hex string.
pub fn hex_lower(bytes: &[u8]) -> String {
    const HEX: [char; 16] = [
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
    ];
    let mut output = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        output.push(HEX[usize::from(byte >> 4)]);
        output.push(HEX[usize::from(byte & 0x0f)]);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── hex_lower tests ─────────────────────────────────────────────────

    #[test]
    fn hex_lower_empty() {
        assert_eq!(hex_lower(&[]), "");
    }

    #[test]
    fn hex_lower_known_bytes() {
        assert_eq!(hex_lower(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
        assert_eq!(
            hex_lower(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]),
            "0123456789abcdef"
        );
    }

    // ─── digests ─────────────────────────────────────────────────────────

    #[test]
    fn md5_known_vector() {
        assert_eq!(md5_hex("hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_sha256_rfc4231_case_2() {
        assert_eq!(
            hmac_sha256_hex("Jefe", "what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn base64_url_safe_alphabet() {
        let encoded = base64::engine::general_purpose::URL_SAFE.encode([0xfb, 0xff]);
        assert_eq!(encoded, "-_8=");
    }

    // ─── formatDateTime ──────────────────────────────────────────────────

    #[test]
    fn format_keeps_offset_unless_utc() {
        let iso = "2024-06-01T18:30:00+02:00";
        assert_eq!(
            format_date_time(iso, "%Y-%m-%d %H:%M", false).expect("local"),
            "2024-06-01 18:30"
        );
        assert_eq!(
            format_date_time(iso, "%Y-%m-%d %H:%M", true).expect("utc"),
            "2024-06-01 16:30"
        );
    }

    #[test]
    fn format_accepts_naive_and_date_only() {
        assert_eq!(
            format_date_time("2024-01-02T03:04:05", "%d.%m.%Y %H:%M:%S", true).expect("naive"),
            "02.01.2024 03:04:05"
        );
        assert_eq!(
            format_date_time("2024-01-02", "%Y/%m/%d", false).expect("date"),
            "2024/01/02"
        );
    }

    #[test]
    fn format_rejects_garbage() {
        assert!(format_date_time("yesterday", "%Y", true).is_err());
        assert!(format_date_time("2024-01-02", "%Q", true).is_err());
    }

    mod proptest_crypto_shim {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn hex_lower_output_is_double_length_lowercase(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
                let encoded = hex_lower(&bytes);
                prop_assert_eq!(encoded.len(), bytes.len() * 2);
                prop_assert!(encoded.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            }

            #[test]
            fn md5_is_always_32_hex_chars(data in ".{0,64}") {
                prop_assert_eq!(md5_hex(&data).len(), 32);
            }
        }
    }
}
