use reqwest::Client;
use std::time::Duration;

/// Shared outbound client for marketplace and gateway calls. Every external
/// call carries an explicit timeout so a stalled marketplace surfaces as a
/// categorical connection error instead of hanging a request.
pub fn build_client() -> Client {
    let timeout = env_secs("HTTP_TIMEOUT_SECS", 15);
    let connect = env_secs("HTTP_CONNECT_TIMEOUT_SECS", 5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn env_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
