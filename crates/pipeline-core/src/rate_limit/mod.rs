//! Backoff helpers shared by the Queue's nack-retry delay and the AI Parse/
//! Categorize processors' per-item retry loop.

/// Parse a `Retry-After` header value (seconds), capped at 60s.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<std::time::Duration> {
    let value = header_value?;
    value
        .parse::<u64>()
        .ok()
        .map(|secs| std::time::Duration::from_secs(secs.min(60)))
}

/// Exponential backoff for queue nack-retry: initial 5s, doubling, capped at
/// 5 minutes, per the Queue component's redelivery contract.
pub fn queue_backoff(attempt: u32) -> std::time::Duration {
    let base_ms = 5_000u64;
    let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
    std::time::Duration::from_millis(delay_ms.min(5 * 60 * 1_000))
}

/// AI Parse/Categorize 429 backoff: `(attempt+1) * 2000ms`.
pub fn ai_rate_limit_backoff(attempt: u32) -> std::time::Duration {
    std::time::Duration::from_millis((attempt as u64 + 1) * 2_000)
}

/// AI Parse/Categorize transient-error backoff (JSON parse error, other
/// non-429 failure): a fixed 1s delay.
pub fn ai_transient_backoff() -> std::time::Duration {
    std::time::Duration::from_millis(1_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn queue_backoff_doubles_and_caps() {
        assert_eq!(queue_backoff(0), Duration::from_secs(5));
        assert_eq!(queue_backoff(1), Duration::from_secs(10));
        assert_eq!(queue_backoff(2), Duration::from_secs(20));
        assert_eq!(queue_backoff(20), Duration::from_secs(5 * 60));
    }

    #[test]
    fn ai_backoff_matches_spec_formula() {
        assert_eq!(ai_rate_limit_backoff(0), Duration::from_millis(2_000));
        assert_eq!(ai_rate_limit_backoff(2), Duration::from_millis(6_000));
    }
}
