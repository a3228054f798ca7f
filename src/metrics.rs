// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Prometheus metrics for the generation pipeline
//!
//! Each `PipelineMetrics` owns its registry so tests can build isolated instances.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct PipelineMetrics {
    registry: Registry,
    /// Submissions by outcome (accepted, cached, busy, unsafe_prompt, ...)
    pub submissions: IntCounterVec,
    pub jobs_completed: IntCounter,
    /// Failed processing attempts, including ones that will be retried
    pub job_failures: IntCounter,
    pub refunds: IntCounter,
    pub provider_retries: IntCounter,
    pub degraded_watermarks: IntCounter,
    /// Seconds per provider call, retries included
    pub provider_latency: Histogram,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let submissions = IntCounterVec::new(
            Opts::new(
                "imagegen_submissions_total",
                "Generation submissions by outcome",
            ),
            &["outcome"],
        )?;
        let jobs_completed = IntCounter::new(
            "imagegen_jobs_completed_total",
            "Generation jobs completed",
        )?;
        let job_failures = IntCounter::new(
            "imagegen_job_failures_total",
            "Failed generation attempts",
        )?;
        let refunds = IntCounter::new("imagegen_refunds_total", "Refunds issued for failed jobs")?;
        let provider_retries = IntCounter::new(
            "imagegen_provider_retries_total",
            "Provider calls retried after a failed attempt",
        )?;
        let degraded_watermarks = IntCounter::new(
            "imagegen_degraded_watermarks_total",
            "Images published without a watermark",
        )?;
        let provider_latency = Histogram::with_opts(
            HistogramOpts::new(
                "imagegen_provider_latency_seconds",
                "Provider generation latency (seconds)",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 180.0]),
        )?;

        registry.register(Box::new(submissions.clone()))?;
        registry.register(Box::new(jobs_completed.clone()))?;
        registry.register(Box::new(job_failures.clone()))?;
        registry.register(Box::new(refunds.clone()))?;
        registry.register(Box::new(provider_retries.clone()))?;
        registry.register(Box::new(degraded_watermarks.clone()))?;
        registry.register(Box::new(provider_latency.clone()))?;

        Ok(Self {
            registry,
            submissions,
            jobs_completed,
            job_failures,
            refunds,
            provider_retries,
            degraded_watermarks,
            provider_latency,
        })
    }

    pub fn record_submission(&self, outcome: &str) {
        self.submissions.with_label_values(&[outcome]).inc();
    }

    pub fn submissions_for(&self, outcome: &str) -> u64 {
        self.submissions.with_label_values(&[outcome]).get()
    }

    /// Text exposition format for `/metrics`
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
