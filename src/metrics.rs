// Prometheus metrics definitions for the Prompt Wizard backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Battles currently in progress across all players.
    pub static ref ACTIVE_BATTLES: IntGauge =
        IntGauge::new("prompt_wizard_active_battles", "Battles currently in progress").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Spells that reached the judge, by result (hit, heal, fizzle).
    pub static ref SPELLS_CAST_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("prompt_wizard_spells_cast_total", "Spells judged"),
        &["result"],
    )
    .unwrap();

    /// Spells blocked by moderation, by first blocking category.
    pub static ref MODERATION_BLOCKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("prompt_wizard_moderation_blocks_total", "Spells blocked by moderation"),
        &["category"],
    )
    .unwrap();

    /// Judgments synthesized locally because the judge failed, by reason.
    pub static ref JUDGE_FALLBACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("prompt_wizard_judge_fallbacks_total", "Fallback judgments"),
        &["reason"],
    )
    .unwrap();

    /// Healing classifications answered by the keyword heuristic.
    pub static ref HEALING_FALLBACKS_TOTAL: IntCounter = IntCounter::new(
        "prompt_wizard_healing_fallbacks_total",
        "Healing classifications answered by keyword heuristic",
    )
    .unwrap();

    pub static ref BATTLES_STARTED_TOTAL: IntCounter = IntCounter::new(
        "prompt_wizard_battles_started_total",
        "Battles started",
    )
    .unwrap();

    /// Battles that reached a terminal state, by outcome (victory, defeat).
    pub static ref BATTLES_FINISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("prompt_wizard_battles_finished_total", "Battles finished"),
        &["outcome"],
    )
    .unwrap();

    pub static ref STAGES_COMPLETED_TOTAL: IntCounter = IntCounter::new(
        "prompt_wizard_stages_completed_total",
        "Stages completed",
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("prompt_wizard_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Latency of external judge calls in seconds.
    pub static ref JUDGE_REQUEST_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "prompt_wizard_judge_request_duration_seconds",
            "External judge call duration in seconds",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0]),
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "prompt_wizard_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 20.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_BATTLES.clone()),
        Box::new(SPELLS_CAST_TOTAL.clone()),
        Box::new(MODERATION_BLOCKS_TOTAL.clone()),
        Box::new(JUDGE_FALLBACKS_TOTAL.clone()),
        Box::new(HEALING_FALLBACKS_TOTAL.clone()),
        Box::new(BATTLES_STARTED_TOTAL.clone()),
        Box::new(BATTLES_FINISHED_TOTAL.clone()),
        Box::new(STAGES_COMPLETED_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(JUDGE_REQUEST_DURATION_SECONDS.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Failed to register metric: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Normalize a URL path for metric labels: player ids (UUIDs) and numeric
/// segments become `:id` to keep label cardinality bounded.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok() || uuid::Uuid::parse_str(segment).is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/worlds"), "/api/worlds");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_normalize_path_with_ids() {
        assert_eq!(
            normalize_path("/api/players/6f1c2a3e-9a51-4c55-8d0e-2f0b8c1d7e44/battle/cast"),
            "/api/players/:id/battle/cast"
        );
        assert_eq!(normalize_path("/api/players/42/map"), "/api/players/:id/map");
    }

    #[test]
    fn test_normalize_path_preserves_names() {
        assert_eq!(normalize_path("/api/spells/evaluate"), "/api/spells/evaluate");
    }

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        let output = gather_metrics();
        assert!(output.is_empty() || output.contains("prompt_wizard_"));
    }

    #[test]
    fn test_metric_increments() {
        ACTIVE_BATTLES.inc();
        ACTIVE_BATTLES.dec();

        SPELLS_CAST_TOTAL.with_label_values(&["hit"]).inc();
        MODERATION_BLOCKS_TOTAL.with_label_values(&["harassment"]).inc();
        JUDGE_FALLBACKS_TOTAL.with_label_values(&["parse"]).inc();
        HEALING_FALLBACKS_TOTAL.inc();
        BATTLES_STARTED_TOTAL.inc();
        BATTLES_FINISHED_TOTAL.with_label_values(&["victory"]).inc();
        STAGES_COMPLETED_TOTAL.inc();

        JUDGE_REQUEST_DURATION_SECONDS.observe(1.2);
        API_REQUEST_DURATION_SECONDS
            .with_label_values(&["/api/worlds"])
            .observe(0.01);
        API_REQUESTS_TOTAL
            .with_label_values(&["GET", "/api/worlds", "200"])
            .inc();
    }
}
