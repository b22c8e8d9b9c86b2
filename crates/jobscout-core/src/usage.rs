//! Token and request accounting against an inference model's quota.
//!
//! Counters live in a [`UsageStats`] value scoped to one pipeline run.
//! Minute counters are zeroed whenever a 60-second wait is taken; day
//! counters reset once 24 hours have elapsed since `last_reset`. Absent
//! caps (a `None` limit) never block.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Per-1K-token pricing used for the usage log's cost estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Quota ceilings for one inference model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLimits {
    pub model_name: String,
    /// Requests per minute.
    pub rpm: Option<u32>,
    /// Requests per day.
    pub rpd: Option<u32>,
    /// Tokens per minute.
    pub tpm: Option<u64>,
    /// Tokens per day.
    pub tpd: Option<u64>,
    pub pricing: Option<ModelPricing>,
}

impl ModelLimits {
    /// Free-tier ceilings for the default model.
    pub fn gemini_flash_lite() -> Self {
        Self {
            model_name: "gemini-2.0-flash-lite".to_string(),
            rpm: Some(30),
            rpd: Some(1500),
            tpm: Some(1_000_000),
            tpd: None,
            pricing: Some(ModelPricing {
                input_per_1k: 0.075,
                output_per_1k: 0.30,
            }),
        }
    }

    /// Known quota ceilings for a model name; unknown models get no caps.
    pub fn for_model(model_name: &str) -> Self {
        let flash_lite = Self::gemini_flash_lite();
        if model_name == flash_lite.model_name {
            flash_lite
        } else {
            Self::unlimited(model_name)
        }
    }

    /// Limits that never block, for tests and unmetered endpoints.
    pub fn unlimited(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            rpm: None,
            rpd: None,
            tpm: None,
            tpd: None,
            pricing: None,
        }
    }

    /// Estimated cost in USD for a call with the given token split.
    pub fn cost_for(&self, prompt_tokens: u64, output_tokens: u64) -> f64 {
        match self.pricing {
            Some(p) => {
                (prompt_tokens as f64 / 1000.0) * p.input_per_1k
                    + (output_tokens as f64 / 1000.0) * p.output_per_1k
            }
            None => 0.0,
        }
    }
}

/// Running token/call counters for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub minute_tokens: u64,
    pub day_tokens: u64,
    pub total_tokens: u64,
    pub calls: u64,
    pub last_minute_calls: u32,
    pub last_day_calls: u32,
    /// Start of the rolling minute window the minute counters cover.
    pub minute_window_started: DateTime<Utc>,
    pub last_reset: DateTime<Utc>,
}

impl UsageStats {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            minute_tokens: 0,
            day_tokens: 0,
            total_tokens: 0,
            calls: 0,
            last_minute_calls: 0,
            last_day_calls: 0,
            minute_window_started: now,
            last_reset: now,
        }
    }

    /// Zero the rolling minute counters and restart the window.
    pub fn reset_minute(&mut self) {
        self.minute_tokens = 0;
        self.last_minute_calls = 0;
        self.minute_window_started = Utc::now();
    }
}

impl Default for UsageStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Record one completed call's token count against all counter windows.
pub fn update(stats: &mut UsageStats, token_count: u64) {
    stats.minute_tokens += token_count;
    stats.day_tokens += token_count;
    stats.total_tokens += token_count;
    stats.calls += 1;
    stats.last_minute_calls += 1;
    stats.last_day_calls += 1;
}

/// Zero the day counters if more than 24h have passed since `last_reset`.
pub fn check_daily_reset(stats: &mut UsageStats) {
    let now = Utc::now();
    if now - stats.last_reset > TimeDelta::hours(24) {
        stats.day_tokens = 0;
        stats.last_day_calls = 0;
        stats.last_reset = now;
    }
}

/// Zero the minute counters once their 60-second window has rolled over.
pub fn check_minute_reset(stats: &mut UsageStats) {
    if Utc::now() - stats.minute_window_started >= TimeDelta::seconds(60) {
        stats.reset_minute();
    }
}

/// Block until the model's quota admits another call.
///
/// Daily request cap: wait out the remainder of the 24h window, then zero
/// the day counters. Per-minute request or token cap: wait 60 seconds,
/// then zero the relevant minute counter. A minute window that has
/// already rolled over clears its counters without waiting. Absent caps
/// never block.
pub async fn check_rate_limits(limits: &ModelLimits, stats: &mut UsageStats) {
    check_minute_reset(stats);

    if let Some(rpd) = limits.rpd {
        if stats.last_day_calls >= rpd {
            let elapsed = Utc::now() - stats.last_reset;
            let remaining = (TimeDelta::hours(24) - elapsed).max(TimeDelta::zero());
            let wait = Duration::from_millis(remaining.num_milliseconds().max(0) as u64);
            tracing::warn!(
                limit = rpd,
                wait_secs = wait.as_secs(),
                "Daily request limit reached, waiting for window reset"
            );
            tokio::time::sleep(wait).await;
            stats.day_tokens = 0;
            stats.last_day_calls = 0;
            stats.last_reset = Utc::now();
        }
    }

    if let Some(rpm) = limits.rpm {
        if stats.last_minute_calls >= rpm {
            tracing::warn!(limit = rpm, "Minute request limit reached, waiting 60s");
            tokio::time::sleep(Duration::from_secs(60)).await;
            stats.last_minute_calls = 0;
        }
    }

    if let Some(tpm) = limits.tpm {
        if stats.minute_tokens >= tpm {
            tracing::warn!(limit = tpm, "Minute token limit reached, waiting 60s");
            tokio::time::sleep(Duration::from_secs(60)).await;
            stats.minute_tokens = 0;
        }
    }
}

/// Multi-line usage summary for end-of-run logging.
pub fn usage_summary(limits: &ModelLimits, stats: &UsageStats) -> String {
    let average = if stats.calls > 0 {
        stats.total_tokens / stats.calls
    } else {
        0
    };
    let tpm_note = limits
        .tpm
        .map(|l| format!(" (limit: {l})"))
        .unwrap_or_default();
    let tpd_note = limits
        .tpd
        .map(|l| format!(" (limit: {l})"))
        .unwrap_or_default();
    [
        format!("Model: {}", limits.model_name),
        format!("Last minute: {} tokens{tpm_note}", stats.minute_tokens),
        format!("Today: {} tokens{tpd_note}", stats.day_tokens),
        format!(
            "All time: {} tokens across {} calls",
            stats.total_tokens, stats.calls
        ),
        format!("Average per call: {average} tokens"),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_increments_all_windows() {
        let mut stats = UsageStats::new();
        update(&mut stats, 1200);
        update(&mut stats, 300);
        assert_eq!(stats.minute_tokens, 1500);
        assert_eq!(stats.day_tokens, 1500);
        assert_eq!(stats.total_tokens, 1500);
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.last_minute_calls, 2);
        assert_eq!(stats.last_day_calls, 2);
    }

    #[test]
    fn daily_reset_only_after_24h() {
        let mut stats = UsageStats::new();
        update(&mut stats, 500);

        // Fresh stats: nothing resets.
        check_daily_reset(&mut stats);
        assert_eq!(stats.day_tokens, 500);

        // Backdate past the window: day counters clear, totals survive.
        stats.last_reset = Utc::now() - TimeDelta::hours(25);
        check_daily_reset(&mut stats);
        assert_eq!(stats.day_tokens, 0);
        assert_eq!(stats.last_day_calls, 0);
        assert_eq!(stats.total_tokens, 500);
        assert!(Utc::now() - stats.last_reset < TimeDelta::minutes(1));
    }

    #[tokio::test]
    async fn absent_caps_never_block() {
        let limits = ModelLimits::unlimited("test-model");
        let mut stats = UsageStats::new();
        for _ in 0..10_000 {
            update(&mut stats, 1_000_000);
        }
        // Would hang for a minute if any cap applied.
        tokio::time::timeout(Duration::from_millis(100), check_rate_limits(&limits, &mut stats))
            .await
            .expect("check_rate_limits must return immediately without caps");
    }

    #[tokio::test]
    async fn under_limit_does_not_block() {
        let limits = ModelLimits::gemini_flash_lite();
        let mut stats = UsageStats::new();
        update(&mut stats, 100);
        tokio::time::timeout(Duration::from_millis(100), check_rate_limits(&limits, &mut stats))
            .await
            .expect("under-limit check must not wait");
    }

    #[tokio::test]
    async fn rolled_over_minute_window_clears_without_waiting() {
        let limits = ModelLimits {
            model_name: "test".into(),
            rpm: Some(2),
            rpd: None,
            tpm: Some(1000),
            tpd: None,
            pricing: None,
        };
        let mut stats = UsageStats::new();
        update(&mut stats, 5000);
        update(&mut stats, 5000);
        stats.minute_window_started = Utc::now() - TimeDelta::seconds(90);

        tokio::time::timeout(Duration::from_millis(100), check_rate_limits(&limits, &mut stats))
            .await
            .expect("stale minute window must not block");
        assert_eq!(stats.minute_tokens, 0);
        assert_eq!(stats.last_minute_calls, 0);
        // Day and total counters are untouched by the minute rollover.
        assert_eq!(stats.day_tokens, 10_000);
        assert_eq!(stats.total_tokens, 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn minute_request_cap_waits_and_resets() {
        let limits = ModelLimits {
            model_name: "test".into(),
            rpm: Some(2),
            rpd: None,
            tpm: None,
            tpd: None,
            pricing: None,
        };
        let mut stats = UsageStats::new();
        update(&mut stats, 10);
        update(&mut stats, 10);
        assert_eq!(stats.last_minute_calls, 2);

        let start = tokio::time::Instant::now();
        check_rate_limits(&limits, &mut stats).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(stats.last_minute_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn minute_token_cap_waits_and_resets() {
        let limits = ModelLimits {
            model_name: "test".into(),
            rpm: None,
            rpd: None,
            tpm: Some(1000),
            tpd: None,
            pricing: None,
        };
        let mut stats = UsageStats::new();
        update(&mut stats, 1000);

        let start = tokio::time::Instant::now();
        check_rate_limits(&limits, &mut stats).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(stats.minute_tokens, 0);
    }

    #[test]
    fn cost_uses_per_1k_pricing() {
        let limits = ModelLimits::gemini_flash_lite();
        let cost = limits.cost_for(2000, 1000);
        assert!((cost - (2.0 * 0.075 + 1.0 * 0.30)).abs() < 1e-9);
        assert_eq!(ModelLimits::unlimited("x").cost_for(5000, 5000), 0.0);
    }

    #[test]
    fn summary_mentions_model_and_totals() {
        let limits = ModelLimits::gemini_flash_lite();
        let mut stats = UsageStats::new();
        update(&mut stats, 400);
        let summary = usage_summary(&limits, &stats);
        assert!(summary.contains("gemini-2.0-flash-lite"));
        assert!(summary.contains("400 tokens across 1 calls"));
        assert!(summary.contains("Average per call: 400"));
    }
}
