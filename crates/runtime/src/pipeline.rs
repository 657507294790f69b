//! Leaderboard request pipeline
//!
//! cache lookup -> script call -> parse -> rank -> trust fan-out -> serialize
//! -> cache store. The cached value is the exact JSON body served to clients,
//! so repeated reads within the TTL are byte-identical.

use crate::cache::ResultCache;
use crate::records::{parse_records, rank};
use crate::script_gateway::{LeaderboardScript, ScriptGateway};
use crate::trust::{TrustEnricher, TrustOracle};
use crate::{metrics, Result, RuntimeConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Which board a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardSelector {
    Overall,
    Current,
}

impl LeaderboardSelector {
    /// Anything other than `current` selects the all-time board.
    pub fn from_tab(tab: Option<&str>) -> Self {
        match tab {
            Some("current") => LeaderboardSelector::Current,
            _ => LeaderboardSelector::Overall,
        }
    }

    pub fn cache_key(self) -> &'static str {
        match self {
            LeaderboardSelector::Overall => "leaderboard:overall",
            LeaderboardSelector::Current => "leaderboard:current",
        }
    }

    /// Oracle period the trust flags are read for
    pub fn period_id(self) -> u32 {
        match self {
            LeaderboardSelector::Overall => 0,
            LeaderboardSelector::Current => 1,
        }
    }
}

pub struct LeaderboardService {
    gateway: Arc<dyn ScriptGateway>,
    enricher: TrustEnricher,
    cache: Arc<ResultCache>,
    script: LeaderboardScript,
    current_period_alias: String,
    enrichment_deadline: Duration,
}

impl LeaderboardService {
    pub fn new(
        gateway: Arc<dyn ScriptGateway>,
        oracle: Arc<dyn TrustOracle>,
        cache: Arc<ResultCache>,
        script: LeaderboardScript,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            gateway,
            enricher: TrustEnricher::new(oracle, config.upstream_timeout),
            cache,
            script,
            current_period_alias: config.current_period_alias.clone(),
            enrichment_deadline: config.enrichment_deadline,
        }
    }

    /// Serialized ranked-and-enriched board for `selector`, served from cache
    /// when fresh.
    pub async fn fetch(&self, selector: LeaderboardSelector) -> Result<String> {
        metrics::LEADERBOARD_REQUESTS_TOTAL.inc();
        self.cache
            .get_or_compute(selector.cache_key(), || self.build(selector))
            .await
    }

    async fn build(&self, selector: LeaderboardSelector) -> Result<String> {
        let deadline = Instant::now() + self.enrichment_deadline;
        let alias = match selector {
            LeaderboardSelector::Current => Some(self.current_period_alias.as_str()),
            LeaderboardSelector::Overall => None,
        };

        let value = self
            .gateway
            .run_script(&self.script.source(), &self.script.arguments(alias))
            .await?;
        let ranked = rank(parse_records(&value)?);
        debug!("Ranked {} entries for {:?}", ranked.len(), selector);

        let enriched = self
            .enricher
            .enrich(ranked, selector.period_id(), deadline)
            .await;
        let flagged = enriched.iter().filter(|e| e.trust_flag.is_some()).count();
        info!(
            "Built {:?} board: {} entries, {} with trust flags",
            selector,
            enriched.len(),
            flagged
        );

        Ok(serde_json::to_string(&enriched)?)
    }
}
