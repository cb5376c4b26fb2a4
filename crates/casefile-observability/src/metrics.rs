//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for Casefile:
//! - AI call counts and latency by service, operation and outcome
//! - Estimated token and cost counters
//! - Usage logging failures
//! - Rate-limit rejections by ceiling
//! - Prompt test outcomes and the latest suite success rate
//! - Background image job outcomes

use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for Casefile
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    // AI call metrics
    /// AI calls recorded in the usage ledger
    pub ai_calls_total: CounterVec,
    /// Wall-clock latency of AI calls
    pub ai_call_duration_seconds: HistogramVec,

    // Accounting metrics
    /// Estimated tokens, split by direction (input/output)
    pub tokens_estimated_total: CounterVec,
    /// Estimated cost in currency units
    pub cost_estimated_total: CounterVec,
    /// Failures while persisting usage records
    pub usage_logging_failures_total: Counter,

    // Rate limiting
    /// Requests rejected by a rate-limit ceiling
    pub rate_limit_rejections_total: CounterVec,

    // Prompt tests
    /// Prompt test executions by prompt type and outcome
    pub prompt_tests_total: CounterVec,
    /// Success rate (percent) of the most recent suite
    pub prompt_suite_success_rate: Gauge,

    // Background work
    /// Detached image jobs by outcome
    pub image_jobs_total: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ai_calls_total = CounterVec::new(
            Opts::new("casefile_ai_calls_total", "Total number of AI service calls"),
            &["service", "operation", "outcome"],
        )?;

        let ai_call_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "casefile_ai_call_duration_seconds",
                "AI service call duration in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["service"],
        )?;

        let tokens_estimated_total = CounterVec::new(
            Opts::new(
                "casefile_tokens_estimated_total",
                "Estimated tokens consumed by AI calls",
            ),
            &["service", "direction"],
        )?;

        let cost_estimated_total = CounterVec::new(
            Opts::new(
                "casefile_cost_estimated_total",
                "Estimated cost of AI calls in currency units",
            ),
            &["service", "operation"],
        )?;

        let usage_logging_failures_total = Counter::with_opts(Opts::new(
            "casefile_usage_logging_failures_total",
            "Usage records that could not be persisted",
        ))?;

        let rate_limit_rejections_total = CounterVec::new(
            Opts::new(
                "casefile_rate_limit_rejections_total",
                "Requests rejected by a rate-limit ceiling",
            ),
            &["ceiling"],
        )?;

        let prompt_tests_total = CounterVec::new(
            Opts::new("casefile_prompt_tests_total", "Prompt test executions"),
            &["prompt_type", "outcome"],
        )?;

        let prompt_suite_success_rate = Gauge::with_opts(Opts::new(
            "casefile_prompt_suite_success_rate",
            "Success rate of the most recent prompt test suite (percent)",
        ))?;

        let image_jobs_total = CounterVec::new(
            Opts::new("casefile_image_jobs_total", "Background image generation jobs"),
            &["kind", "outcome"],
        )?;

        registry.register(Box::new(ai_calls_total.clone()))?;
        registry.register(Box::new(ai_call_duration_seconds.clone()))?;
        registry.register(Box::new(tokens_estimated_total.clone()))?;
        registry.register(Box::new(cost_estimated_total.clone()))?;
        registry.register(Box::new(usage_logging_failures_total.clone()))?;
        registry.register(Box::new(rate_limit_rejections_total.clone()))?;
        registry.register(Box::new(prompt_tests_total.clone()))?;
        registry.register(Box::new(prompt_suite_success_rate.clone()))?;
        registry.register(Box::new(image_jobs_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            ai_calls_total,
            ai_call_duration_seconds,
            tokens_estimated_total,
            cost_estimated_total,
            usage_logging_failures_total,
            rate_limit_rejections_total,
            prompt_tests_total,
            prompt_suite_success_rate,
            image_jobs_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one ledger entry
    pub fn record_usage(
        &self,
        service: &str,
        operation: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
        success: bool,
    ) {
        let outcome = if success { "success" } else { "failure" };
        self.ai_calls_total
            .with_label_values(&[service, operation, outcome])
            .inc();
        self.tokens_estimated_total
            .with_label_values(&[service, "input"])
            .inc_by(input_tokens as f64);
        self.tokens_estimated_total
            .with_label_values(&[service, "output"])
            .inc_by(output_tokens as f64);
        // Counters panic on negative increments
        if cost.is_finite() && cost > 0.0 {
            self.cost_estimated_total
                .with_label_values(&[service, operation])
                .inc_by(cost);
        }
    }

    /// Record the latency of an AI call
    pub fn record_ai_latency(&self, service: &str, duration_secs: f64) {
        self.ai_call_duration_seconds
            .with_label_values(&[service])
            .observe(duration_secs);
    }

    /// Record a usage record that could not be persisted
    pub fn record_usage_logging_failure(&self) {
        self.usage_logging_failures_total.inc();
    }

    /// Record a rate-limit rejection
    pub fn record_rate_limit_rejection(&self, ceiling: &str) {
        self.rate_limit_rejections_total
            .with_label_values(&[ceiling])
            .inc();
    }

    /// Record a single prompt test result
    pub fn record_prompt_test(&self, prompt_type: &str, success: bool) {
        let outcome = if success { "passed" } else { "failed" };
        self.prompt_tests_total
            .with_label_values(&[prompt_type, outcome])
            .inc();
    }

    /// Record the success rate of a finished suite
    pub fn record_suite(&self, success_rate: f64) {
        self.prompt_suite_success_rate.set(success_rate);
    }

    /// Record the outcome of a background image job
    pub fn record_image_job(&self, kind: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.image_jobs_total
            .with_label_values(&[kind, outcome])
            .inc();
    }
}
