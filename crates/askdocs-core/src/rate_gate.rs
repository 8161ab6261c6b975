//! Per-identity ask quota.
//!
//! Anonymous callers get [`RateGate::max_asks`] asks per rolling
//! [`RateGate::window`]. A caller who supplies their own upstream credential
//! is not counted.
//!
//! The gate holds no state; the [`QueryLog`] is the counter. Counting and
//! the later append are not atomic, so concurrent requests from one
//! identity can overshoot the limit slightly.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::{Credential, IpHash};
use crate::store::QueryLog;

/// Outcome of [`RateGate::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Use the caller's credential for this request's upstream calls.
    Bypass(Credential),
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy)]
pub struct RateGate {
    pub max_asks: u64,
    pub window: Duration,
}

impl Default for RateGate {
    fn default() -> Self {
        Self {
            max_asks: 6,
            window: Duration::hours(24),
        }
    }
}

impl RateGate {
    pub fn new(max_asks: u64, window: Duration) -> Self {
        Self { max_asks, window }
    }

    /// Decide whether `iphash` may ask now.
    ///
    /// A bypass credential short-circuits without reading the log.
    /// Otherwise the request is denied when the asks already in the window
    /// plus this one exceed `max_asks`.
    pub async fn check(
        &self,
        log: &dyn QueryLog,
        iphash: &IpHash,
        bypass: Option<Credential>,
        now: DateTime<Utc>,
    ) -> Result<GateDecision> {
        if let Some(credential) = bypass {
            return Ok(GateDecision::Bypass(credential));
        }

        let since = now.checked_sub_signed(self.window).ok_or_else(|| {
            anyhow!("rate window {} reaches before the earliest date", self.window)
        })?;
        let prior = log.count_since(iphash, since).await?;
        debug!(identity = iphash.short(), prior, "rate gate count");

        if prior + 1 > self.max_asks {
            Ok(GateDecision::Deny)
        } else {
            Ok(GateDecision::Allow)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AskRecord, Query};
    use crate::store::memory::InMemoryQueryLog;
    use async_trait::async_trait;

    async fn seed(log: &InMemoryQueryLog, ip: &IpHash, at: DateTime<Utc>, n: usize) {
        for _ in 0..n {
            let record = AskRecord::new(
                Query::parse("What is a block theme?", 200).unwrap(),
                ip.clone(),
                "answer".into(),
                vec![],
                at,
            );
            log.append(&record).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_sixth_ask_allowed() {
        let log = InMemoryQueryLog::new();
        let ip = IpHash::from_addr("198.51.100.1");
        let now = Utc::now();
        seed(&log, &ip, now - Duration::hours(1), 5).await;

        let decision = RateGate::default().check(&log, &ip, None, now).await.unwrap();
        assert_eq!(decision, GateDecision::Allow);
    }

    #[tokio::test]
    async fn test_seventh_ask_denied() {
        let log = InMemoryQueryLog::new();
        let ip = IpHash::from_addr("198.51.100.1");
        let now = Utc::now();
        seed(&log, &ip, now - Duration::hours(1), 6).await;

        let decision = RateGate::default().check(&log, &ip, None, now).await.unwrap();
        assert_eq!(decision, GateDecision::Deny);
    }

    #[tokio::test]
    async fn test_asks_outside_window_not_counted() {
        let log = InMemoryQueryLog::new();
        let ip = IpHash::from_addr("198.51.100.1");
        let now = Utc::now();
        seed(&log, &ip, now - Duration::hours(25), 10).await;

        let decision = RateGate::default().check(&log, &ip, None, now).await.unwrap();
        assert_eq!(decision, GateDecision::Allow);
    }

    #[tokio::test]
    async fn test_window_lower_bound_is_inclusive() {
        let log = InMemoryQueryLog::new();
        let ip = IpHash::from_addr("198.51.100.1");
        let now = Utc::now();
        seed(&log, &ip, now - Duration::hours(24), 6).await;

        let decision = RateGate::default().check(&log, &ip, None, now).await.unwrap();
        assert_eq!(decision, GateDecision::Deny);
    }

    #[tokio::test]
    async fn test_other_identities_not_counted() {
        let log = InMemoryQueryLog::new();
        let ip = IpHash::from_addr("198.51.100.1");
        let now = Utc::now();
        seed(&log, &IpHash::from_addr("198.51.100.2"), now, 6).await;

        let decision = RateGate::default().check(&log, &ip, None, now).await.unwrap();
        assert_eq!(decision, GateDecision::Allow);
    }

    #[tokio::test]
    async fn test_unrepresentable_window_is_error() {
        let log = InMemoryQueryLog::new();
        let ip = IpHash::from_addr("198.51.100.1");
        let gate = RateGate::new(6, Duration::try_days(100_000_000).unwrap());
        assert!(gate.check(&log, &ip, None, Utc::now()).await.is_err());
    }

    struct PanickingLog;

    #[async_trait]
    impl QueryLog for PanickingLog {
        async fn append(&self, _record: &AskRecord) -> Result<i64> {
            panic!("append must not be called");
        }
        async fn count_since(&self, _iphash: &IpHash, _since: DateTime<Utc>) -> Result<u64> {
            panic!("count_since must not be called");
        }
    }

    #[tokio::test]
    async fn test_bypass_does_not_read_log() {
        let ip = IpHash::from_addr("198.51.100.1");
        let cred = Credential::new("sk-caller-supplied-credential");
        let decision = RateGate::default()
            .check(&PanickingLog, &ip, Some(cred.clone()), Utc::now())
            .await
            .unwrap();
        assert_eq!(decision, GateDecision::Bypass(cred));
    }

    #[tokio::test]
    async fn test_custom_limits() {
        let log = InMemoryQueryLog::new();
        let ip = IpHash::from_addr("198.51.100.1");
        let now = Utc::now();
        seed(&log, &ip, now - Duration::minutes(30), 1).await;

        let strict = RateGate::new(1, Duration::hours(1));
        assert_eq!(
            strict.check(&log, &ip, None, now).await.unwrap(),
            GateDecision::Deny
        );
        let short_window = RateGate::new(1, Duration::minutes(10));
        assert_eq!(
            short_window.check(&log, &ip, None, now).await.unwrap(),
            GateDecision::Allow
        );
    }
}
