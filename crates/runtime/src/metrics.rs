//! Prometheus metrics for monitoring

use lazy_static::lazy_static;
use prometheus::{Counter, Histogram, HistogramOpts, Registry};

lazy_static! {
    pub static ref LEADERBOARD_REQUESTS_TOTAL: Counter = Counter::new(
        "memoree_leaderboard_requests_total",
        "Total number of leaderboard requests served"
    ).unwrap();

    pub static ref CACHE_HITS_TOTAL: Counter = Counter::new(
        "memoree_leaderboard_cache_hits_total",
        "Leaderboard requests answered from the result cache"
    ).unwrap();

    pub static ref CACHE_MISSES_TOTAL: Counter = Counter::new(
        "memoree_leaderboard_cache_misses_total",
        "Leaderboard requests that recomputed the payload"
    ).unwrap();

    pub static ref TRUST_LOOKUP_FAILURES_TOTAL: Counter = Counter::new(
        "memoree_trust_lookup_failures_total",
        "Trust lookups that ended without a flag"
    ).unwrap();

    pub static ref LINK_REQUESTS_TOTAL: Counter = Counter::new(
        "memoree_link_requests_total",
        "Identity link requests received"
    ).unwrap();

    pub static ref RELAY_FAILURES_TOTAL: Counter = Counter::new(
        "memoree_relay_failures_total",
        "Relayer submissions that failed"
    ).unwrap();

    pub static ref SCRIPT_CALL_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "memoree_script_call_duration_seconds",
            "Round trip time of primary ledger script calls"
        )
    ).unwrap();
}

pub fn init_metrics() -> Registry {
    let registry = Registry::new();

    registry.register(Box::new(LEADERBOARD_REQUESTS_TOTAL.clone())).unwrap();
    registry.register(Box::new(CACHE_HITS_TOTAL.clone())).unwrap();
    registry.register(Box::new(CACHE_MISSES_TOTAL.clone())).unwrap();
    registry.register(Box::new(TRUST_LOOKUP_FAILURES_TOTAL.clone())).unwrap();
    registry.register(Box::new(LINK_REQUESTS_TOTAL.clone())).unwrap();
    registry.register(Box::new(RELAY_FAILURES_TOTAL.clone())).unwrap();
    registry.register(Box::new(SCRIPT_CALL_DURATION.clone())).unwrap();

    registry
}
