use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, TextEncoder};
use tracing::warn;

pub static METRICS: Lazy<LearningMetrics> = Lazy::new(LearningMetrics::new);

#[derive(Clone)]
pub struct LearningMetrics {
    pub pipeline_runs: IntCounterVec,
    pub pipeline_duration_seconds: Histogram,
    pub items_processed: IntCounter,
    pub faqs_generated: IntCounterVec,
    pub ai_requests: IntCounterVec,
    pub ai_fallbacks: IntCounter,
}

impl LearningMetrics {
    fn new() -> Self {
        let registry = prometheus::default_registry();

        let pipeline_runs = IntCounterVec::new(
            Opts::new(
                "faq_learning_pipeline_runs_total",
                "Learning pipeline runs by final status",
            ),
            &["status"],
        )
        .expect("valid metric opts for faq_learning_pipeline_runs_total");

        let pipeline_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "faq_learning_pipeline_duration_seconds",
                "Wall-clock duration of a learning pipeline run",
            )
            .buckets(vec![0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        )
        .expect("valid metric opts for faq_learning_pipeline_duration_seconds");

        let items_processed = IntCounter::with_opts(Opts::new(
            "faq_learning_items_processed_total",
            "Normalized items that went through confidence scoring",
        ))
        .expect("valid metric opts for faq_learning_items_processed_total");

        let faqs_generated = IntCounterVec::new(
            Opts::new(
                "faq_learning_faqs_generated_total",
                "Learned FAQ entries persisted by initial status",
            ),
            &["status"],
        )
        .expect("valid metric opts for faq_learning_faqs_generated_total");

        let ai_requests = IntCounterVec::new(
            Opts::new(
                "faq_learning_ai_requests_total",
                "AI generation requests by provider and outcome",
            ),
            &["provider", "outcome"],
        )
        .expect("valid metric opts for faq_learning_ai_requests_total");

        let ai_fallbacks = IntCounter::with_opts(Opts::new(
            "faq_learning_ai_fallbacks_total",
            "Generations retried on a fallback provider",
        ))
        .expect("valid metric opts for faq_learning_ai_fallbacks_total");

        for metric in [
            Box::new(pipeline_runs.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(pipeline_duration_seconds.clone()),
            Box::new(items_processed.clone()),
            Box::new(faqs_generated.clone()),
            Box::new(ai_requests.clone()),
            Box::new(ai_fallbacks.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register faq learning metric: {}", e);
            }
        }

        Self {
            pipeline_runs,
            pipeline_duration_seconds,
            items_processed,
            faqs_generated,
            ai_requests,
            ai_fallbacks,
        }
    }
}

/// Text exposition of the default registry
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
