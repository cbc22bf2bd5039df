//! Fuzz credential extraction and proxy range parsing.
//!
//! Both run on attacker-controlled header values before authentication.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_credentials
//! ```

#![no_main]

use axum::http::{HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;
use keygate::credentials::{digest_secret, extract_credential};
use keygate::middleware::CidrRange;

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = HeaderValue::from_bytes(data) {
        for name in ["authorization", "x-api-key"] {
            let mut headers = HeaderMap::new();
            headers.insert(name, value.clone());
            if let Ok(raw) = extract_credential(&headers) {
                assert!(!raw.is_empty());
                assert_eq!(digest_secret(raw).len(), 64);
            }
        }
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = CidrRange::parse(s);
    }
});
