//! Reconnection backoff schedule (§4.3).

use std::time::Duration;

const BACKOFF_CEILING_SECS: u64 = 30;

/// `min(2^n seconds, 30 s)` for retry `n`: 1 s, 2 s, 4 s, 8 s, 16 s, 30 s, 30 s, …
pub fn backoff_duration(retry: u32) -> Duration {
    let secs = 2u64.saturating_pow(retry).min(BACKOFF_CEILING_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_documented_schedule() {
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];
        for (n, secs) in expected.iter().enumerate() {
            assert_eq!(backoff_duration(n as u32).as_secs(), *secs);
        }
    }

    #[test]
    fn bounded_between_one_and_thirty_seconds_and_nondecreasing() {
        let mut previous = 0;
        for n in 0..10u32 {
            let secs = backoff_duration(n).as_secs();
            assert!((1..=30).contains(&secs));
            assert!(secs >= previous);
            previous = secs;
        }
    }

    #[test]
    fn saturates_at_thirty_for_n_at_least_five() {
        for n in 5..20u32 {
            assert_eq!(backoff_duration(n).as_secs(), 30);
        }
    }
}
