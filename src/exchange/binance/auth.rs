//! Binance request signing and clock-skew compensation

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use std::fmt;
use std::time::Duration;

use crate::error::{ExchangeError, Result};

type HmacSha256 = Hmac<Sha256>;

/// API credentials, supplied from outside as opaque strings
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Signs query strings and tracks the offset to the exchange clock
#[derive(Debug)]
pub struct Signer {
    credentials: Credentials,
    recv_window: Duration,
    /// server time - local time, in milliseconds
    clock_skew: Mutex<i64>,
}

impl Signer {
    pub fn new(credentials: Credentials, recv_window: Duration) -> Self {
        Self {
            credentials,
            recv_window,
            clock_skew: Mutex::new(0),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    pub fn clock_skew(&self) -> i64 {
        *self.clock_skew.lock()
    }

    /// Record an exchange-reported time and return the new skew
    pub fn record_server_time(&self, server_time_ms: i64) -> i64 {
        let skew = server_time_ms - local_time_ms();
        *self.clock_skew.lock() = skew;
        skew
    }

    /// Local UTC time corrected by the measured skew
    pub fn timestamp(&self) -> i64 {
        local_time_ms() + self.clock_skew()
    }

    /// Build the query string for a request. Signed requests carry
    /// `recvWindow`, `timestamp` and a trailing `signature`.
    pub fn query(&self, params: &[(&str, String)], signed: bool) -> Result<String> {
        if signed {
            self.signed_query_at(params, self.timestamp())
        } else {
            Ok(build_query(params))
        }
    }

    fn signed_query_at(&self, params: &[(&str, String)], timestamp: i64) -> Result<String> {
        let mut all: Vec<(&str, String)> = params.to_vec();
        all.push(("recvWindow", self.recv_window.as_millis().to_string()));
        all.push(("timestamp", timestamp.to_string()));

        let query = build_query(&all);
        let signature = self.signature(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    /// Hex-encoded HMAC-SHA256 of `payload` under the secret key
    pub fn signature(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret_key.as_bytes())
            .map_err(|e| ExchangeError::Signing(format!("HMAC setup failed: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Join parameters in the order given, URL-encoding values and omitting blanks
pub fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn local_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Example key pair from the Binance API documentation
    const API_KEY: &str = "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A";
    const SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";

    fn signer() -> Signer {
        Signer::new(Credentials::new(API_KEY, SECRET), Duration::from_millis(5000))
    }

    #[test]
    fn test_signature_matches_documented_example() {
        let params = [
            ("symbol", "LTCBTC".to_string()),
            ("side", "BUY".to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", "1".to_string()),
            ("price", "0.1".to_string()),
        ];

        let query = signer().signed_query_at(&params, 1499827319559).unwrap();
        assert_eq!(
            query,
            "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1\
             &recvWindow=5000&timestamp=1499827319559\
             &signature=c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_build_query_keeps_order_and_drops_blanks() {
        let params = [
            ("zeta", "1".to_string()),
            ("alpha", "".to_string()),
            ("note", "a b&c".to_string()),
        ];
        assert_eq!(build_query(&params), "zeta=1&note=a%20b%26c");
    }

    #[test]
    fn test_unsigned_query_has_no_signature() {
        let query = signer()
            .query(&[("symbol", "BTCUSDT".to_string())], false)
            .unwrap();
        assert_eq!(query, "symbol=BTCUSDT");
    }

    #[test]
    fn test_timestamp_applies_clock_skew() {
        let signer = signer();
        let skew = signer.record_server_time(local_time_ms() + 60_000);
        assert!((59_000..=60_000).contains(&skew));
        assert!(signer.timestamp() - local_time_ms() >= 59_000);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let rendered = format!("{:?}", signer());
        assert!(!rendered.contains(SECRET));
        assert!(!rendered.contains(API_KEY));
    }
}
