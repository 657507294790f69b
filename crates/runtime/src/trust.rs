//! Trust flag enrichment from the oracle contract
//!
//! Every ranked entry gets its own read-only lookup. Lookups run concurrently
//! and a failed lookup only nulls its own entry; the batch as a whole never
//! fails.

use crate::records::RankedEntry;
use crate::{metrics, Result, RuntimeError};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Summary stored by the oracle for one identity and period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSummary {
    pub delta_rating: i32,
    /// 0 = clean, 1 = suspect, 2 = banned
    pub cheat_flag: u8,
    pub coach_id: [u8; 16],
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrustOracle: Send + Sync {
    /// `Ok(None)` when nothing is recorded for the identity
    async fn get_summary(
        &self,
        identity_key: [u8; 32],
        period_id: u32,
    ) -> Result<Option<PlayerSummary>>;
}

/// Left-pad a hex participant id to a 32-byte oracle key.
pub fn identity_key(participant: &str) -> Result<[u8; 32]> {
    let digits = participant.strip_prefix("0x").unwrap_or(participant);
    if digits.is_empty() || digits.len() > 64 {
        return Err(RuntimeError::Validation(format!(
            "participant {participant:?} does not fit a 32-byte key"
        )));
    }

    let padded = format!("{digits:0>64}");
    let mut key = [0u8; 32];
    hex::decode_to_slice(&padded, &mut key).map_err(|e| {
        RuntimeError::Validation(format!("participant {participant:?} is not hex: {e}"))
    })?;
    Ok(key)
}

/// Outcome of one lookup, kept distinct until the response boundary
#[derive(Debug, Clone, PartialEq)]
enum TrustLookup {
    Flag(u8),
    NotFound,
    Failed(String),
}

impl TrustLookup {
    fn into_flag(self, participant: &str) -> Option<u8> {
        match self {
            TrustLookup::Flag(flag) => Some(flag),
            TrustLookup::NotFound => {
                debug!("No trust summary for {}", participant);
                None
            }
            TrustLookup::Failed(reason) => {
                debug!("Trust lookup for {} failed: {}", participant, reason);
                metrics::TRUST_LOOKUP_FAILURES_TOTAL.inc();
                None
            }
        }
    }
}

pub struct TrustEnricher {
    oracle: Arc<dyn TrustOracle>,
    lookup_timeout: Duration,
}

impl TrustEnricher {
    pub fn new(oracle: Arc<dyn TrustOracle>, lookup_timeout: Duration) -> Self {
        Self {
            oracle,
            lookup_timeout,
        }
    }

    /// Fill `trust_flag` on every entry.
    ///
    /// Returns once every lookup has resolved or `deadline` passed; lookups
    /// still running at the deadline are dropped and leave `None`.
    pub async fn enrich(
        &self,
        entries: Vec<RankedEntry>,
        period_id: u32,
        deadline: Instant,
    ) -> Vec<RankedEntry> {
        let outcomes = join_all(
            entries
                .iter()
                .map(|entry| self.lookup(&entry.participant, period_id, deadline)),
        )
        .await;

        entries
            .into_iter()
            .zip(outcomes)
            .map(|(mut entry, outcome)| {
                entry.trust_flag = outcome.into_flag(&entry.participant);
                entry
            })
            .collect()
    }

    async fn lookup(&self, participant: &str, period_id: u32, deadline: Instant) -> TrustLookup {
        let key = match identity_key(participant) {
            Ok(key) => key,
            Err(e) => return TrustLookup::Failed(e.to_string()),
        };

        let deadline = deadline.min(Instant::now() + self.lookup_timeout);
        match timeout_at(deadline, self.oracle.get_summary(key, period_id)).await {
            Ok(Ok(Some(summary))) => TrustLookup::Flag(summary.cheat_flag),
            Ok(Ok(None)) => TrustLookup::NotFound,
            Ok(Err(e)) => TrustLookup::Failed(e.to_string()),
            Err(_) => TrustLookup::Failed("deadline exceeded".to_string()),
        }
    }
}
