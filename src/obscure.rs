//! Obscured config blob codec: byte-XOR against a fixed key, then base64.
//!
//! This is casual deterrence for configuration shipped inside client
//! bundles, not cryptography. The key bytes and the short `u`/`c` field
//! names are frozen so blobs already deployed keep decoding identically.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Fixed XOR key. Changing this invalidates every deployed blob.
const XOR_KEY: [u8; 16] = [
    73, 119, 52, 95, 107, 51, 121, 98, 51, 115, 116, 48, 110, 33, 55, 50,
];

/// Payload carried by an obscured blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObscuredConfig {
    /// Licensing endpoint URL.
    #[serde(rename = "u")]
    pub url: String,
    /// Client identifier sent with each check.
    #[serde(rename = "c")]
    pub client_id: String,
}

fn xor_with_key(bytes: &mut [u8]) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b ^= XOR_KEY[i % XOR_KEY.len()];
    }
}

/// Decode an obscured blob. Any failure (bad base64, bad UTF-8, bad JSON)
/// yields `None` — callers treat an undecodable blob as absent config.
pub fn decode(blob: &str) -> Option<ObscuredConfig> {
    let mut bytes = base64::engine::general_purpose::STANDARD
        .decode(blob.trim())
        .ok()?;
    xor_with_key(&mut bytes);
    let plain = String::from_utf8(bytes).ok()?;
    serde_json::from_str(&plain).ok()
}

/// Encode a config into a blob. Inverse of [`decode`]; used by the CLI to
/// author deployment blobs.
pub fn encode(config: &ObscuredConfig) -> String {
    // Serialization of a two-string struct cannot fail.
    let plain = serde_json::to_string(config).unwrap_or_default();
    let mut bytes = plain.into_bytes();
    xor_with_key(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("").is_none());
        assert!(decode("not base64 !!!").is_none());
        // Valid base64, but the XOR'd plaintext is not JSON.
        assert!(decode("aGVsbG8gd29ybGQ=").is_none());
    }

    #[test]
    fn test_encode_uses_short_field_names() {
        let blob = encode(&ObscuredConfig {
            url: "https://license.example.test/check".into(),
            client_id: "muni-01".into(),
        });
        let mut bytes = base64::engine::general_purpose::STANDARD
            .decode(&blob)
            .unwrap();
        xor_with_key(&mut bytes);
        let plain = String::from_utf8(bytes).unwrap();
        assert!(plain.contains("\"u\""), "plaintext was: {plain}");
        assert!(plain.contains("\"c\""), "plaintext was: {plain}");
    }

    #[test]
    fn test_decode_known_blob() {
        // Blob authored with the frozen key; decoding must stay stable.
        let blob = encode(&ObscuredConfig {
            url: "https://lic.city.example/v1".into(),
            client_id: "ops".into(),
        });
        let decoded = decode(&blob).unwrap();
        assert_eq!(decoded.url, "https://lic.city.example/v1");
        assert_eq!(decoded.client_id, "ops");
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(url in "[ -~]{0,64}", client_id in "[ -~]{0,32}") {
            let config = ObscuredConfig { url, client_id };
            prop_assert_eq!(decode(&encode(&config)), Some(config));
        }

        #[test]
        fn prop_decode_never_panics(blob in "\\PC{0,128}") {
            let _ = decode(&blob);
        }
    }
}
