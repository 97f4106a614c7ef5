//! Dashboard statistics derived from metric queries
//!
//! Every figure is read through [`MetricsQuery`]. A failed or empty query is
//! read as zero so the dashboard degrades instead of erroring.

use chrono::{DateTime, Duration, Local};
use serde::Serialize;
use std::sync::Arc;
use tracing::{instrument, warn};

use super::query::MetricsQuery;
use super::store::{MetricsStore, TemplateKind};

/// Display names of the reported template buckets
pub const TEMPLATE_NAMES: [&str; 4] = ["일상 대화", "조직도 조회", "양식 요청", "QnA"];

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const ZONE_LE: [&str; 5] = ["5.0", "10.0", "15.0", "20.0", "+Inf"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationStats {
    pub count: u64,
    pub increase: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateStats {
    pub percent: f64,
    pub increase: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseTimeStats {
    pub avg: f64,
    pub zones: [u64; 5],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateUsageStats {
    pub templates: Vec<String>,
    pub counts: Vec<u64>,
    pub percentages: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekResponseStats {
    pub values: [u64; 7],
}

type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

pub struct MetricsAnalytics {
    query: Arc<dyn MetricsQuery>,
    store: Arc<MetricsStore>,
    clock: Clock,
}

impl MetricsAnalytics {
    pub fn new(query: Arc<dyn MetricsQuery>, store: Arc<MetricsStore>) -> Self {
        Self {
            query,
            store,
            clock: Arc::new(Local::now),
        }
    }

    /// Fix "now", for reproducible day and week boundaries
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    async fn scalar(&self, promql: &str) -> f64 {
        match self.query.query(promql).await {
            Ok(samples) => samples.first().map(|s| s.value).unwrap_or(0.0),
            Err(e) => {
                warn!(query = promql, error = %e, "Metrics query failed, reading as zero");
                0.0
            }
        }
    }

    /// Today's conversation count and change against yesterday
    #[instrument(skip(self))]
    pub async fn daily_conversations(&self) -> ConversationStats {
        let now = (self.clock)();
        let today = now.format("%Y-%m-%d").to_string();
        let yesterday = (now - Duration::days(1)).format("%Y-%m-%d").to_string();

        let today_count = self
            .scalar(&format!("sum(chatbot_daily_conversations_total{{date=\"{}\"}})", today))
            .await;
        let yesterday_count = self
            .scalar(&format!("sum(chatbot_daily_conversations_total{{date=\"{}\"}})", yesterday))
            .await;

        ConversationStats {
            count: today_count as u64,
            increase: round_to(percent_change(today_count, yesterday_count), 2),
        }
    }

    /// Share of successful responses, compared with the cumulative ratio a
    /// week ago
    #[instrument(skip(self))]
    pub async fn success_rate(&self) -> RateStats {
        let week_ago = self.week_ago_ts();
        let success = self.scalar("sum(chatbot_response_success_total)").await;
        let failure = self.scalar("sum(chatbot_response_failure_total)").await;
        let past_success = self
            .scalar(&format!("sum(chatbot_response_success_total @ {})", week_ago))
            .await;
        let past_failure = self
            .scalar(&format!("sum(chatbot_response_failure_total @ {})", week_ago))
            .await;

        rate_stats(ratio(success, failure), ratio(past_success, past_failure))
    }

    /// Share of likes among ratings, compared with a week ago
    #[instrument(skip(self))]
    pub async fn satisfaction(&self) -> RateStats {
        let week_ago = self.week_ago_ts();
        let likes = self
            .scalar(r#"sum(chatbot_user_feedback_total{feedback_type="like"})"#)
            .await;
        let dislikes = self
            .scalar(r#"sum(chatbot_user_feedback_total{feedback_type="dislike"})"#)
            .await;
        let past_likes = self
            .scalar(&format!(
                "sum(chatbot_user_feedback_total{{feedback_type=\"like\"}} @ {})",
                week_ago
            ))
            .await;
        let past_dislikes = self
            .scalar(&format!(
                "sum(chatbot_user_feedback_total{{feedback_type=\"dislike\"}} @ {})",
                week_ago
            ))
            .await;

        rate_stats(ratio(likes, dislikes), ratio(past_likes, past_dislikes))
    }

    /// Mean response time and per-zone counts, restored floor plus the
    /// histogram of this process
    #[instrument(skip(self))]
    pub async fn response_time(&self) -> ResponseTimeStats {
        let floor = self.store.latency_floor();

        let current_sum = self.scalar("sum(chatbot_total_response_time_seconds_sum)").await;
        let current_count = self
            .scalar("sum(chatbot_total_response_time_seconds_count)")
            .await;

        let mut cumulative = [0.0; 5];
        for (slot, le) in cumulative.iter_mut().zip(ZONE_LE) {
            *slot = self
                .scalar(&format!(
                    "sum(chatbot_total_response_time_seconds_bucket{{le=\"{}\"}})",
                    le
                ))
                .await;
        }
        let current_zones = zones_from_cumulative(&cumulative);

        let total_sum = floor.total_sum + current_sum;
        let total_count = floor.total_count as f64 + current_count;
        let mut zones = floor.zone_counts;
        for (z, c) in zones.iter_mut().zip(current_zones) {
            *z += c;
        }

        let avg = if total_count > 0.0 { total_sum / total_count } else { 0.0 };
        ResponseTimeStats {
            avg: round_to(avg, 2),
            zones,
        }
    }

    /// Usage per strategy; internal RAG and FAQ answers are reported together
    #[instrument(skip(self))]
    pub async fn template_usage(&self) -> TemplateUsageStats {
        let mut raw = [0u64; 5];
        for (slot, kind) in raw.iter_mut().zip(TemplateKind::ALL) {
            *slot = self
                .scalar(&format!(
                    "sum(chatbot_prompt_template_usage_total{{template_type=\"{}\"}})",
                    kind.as_str()
                ))
                .await as u64;
        }

        let counts = vec![raw[0], raw[1], raw[2], raw[3] + raw[4]];
        let total: u64 = counts.iter().sum();
        let percentages = counts
            .iter()
            .map(|&c| {
                if total > 0 {
                    round_to(c as f64 / total as f64 * 100.0, 1)
                } else {
                    0.0
                }
            })
            .collect();

        TemplateUsageStats {
            templates: TEMPLATE_NAMES.iter().map(|s| s.to_string()).collect(),
            counts,
            percentages,
        }
    }

    /// Responses per weekday of the current week, Monday first
    #[instrument(skip(self))]
    pub async fn week_response(&self) -> WeekResponseStats {
        let week = (self.clock)().format("%Y-W%U").to_string();
        let mut values = [0u64; 7];
        for (slot, day) in values.iter_mut().zip(WEEKDAYS) {
            *slot = self
                .scalar(&format!(
                    "sum(chatbot_weekly_responses_total{{week=\"{}\",day_of_week=\"{}\"}})",
                    week, day
                ))
                .await as u64;
        }
        WeekResponseStats { values }
    }

    fn week_ago_ts(&self) -> i64 {
        ((self.clock)() - Duration::days(7)).timestamp()
    }
}

/// Percentage change; `+100` when growing from zero, `0` when both are zero
pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        (current - previous) / previous * 100.0
    } else if current > 0.0 {
        100.0
    } else {
        0.0
    }
}

/// Relative change of a rate; zero when there is no past rate
fn rate_change(current: f64, past: f64) -> f64 {
    if past > 0.0 {
        (current - past) / past * 100.0
    } else {
        0.0
    }
}

fn ratio(hits: f64, misses: f64) -> f64 {
    let total = hits + misses;
    if total > 0.0 {
        hits / total * 100.0
    } else {
        0.0
    }
}

fn rate_stats(current: f64, past: f64) -> RateStats {
    RateStats {
        percent: round_to(current, 2),
        increase: round_to(rate_change(current, past), 2),
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Per-zone counts from cumulative `le` bucket counts, clamped at zero
pub fn zones_from_cumulative(cumulative: &[f64; 5]) -> [u64; 5] {
    let mut zones = [0u64; 5];
    let mut previous = 0.0;
    for (zone, &count) in zones.iter_mut().zip(cumulative) {
        *zone = (count - previous).max(0.0) as u64;
        previous = count;
    }
    zones
}
