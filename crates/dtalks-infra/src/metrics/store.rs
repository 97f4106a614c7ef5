//! Chatbot metrics registry with durable snapshots
//!
//! Counters are restored from the dump file at startup and keep counting from
//! there. Latency is split in two: a durable floor restored from the stats
//! file, and the live histogram of this process. Readers add the two, so the
//! floor is only replaced by the next restore.

use chrono::{DateTime, Local, NaiveDate};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use super::prometheus::{CounterVec, GaugeVec, HistogramVec, Sample};
use crate::Result;

/// Upper bounds of the total response time histogram
pub const LATENCY_BUCKETS: [f64; 9] = [0.5, 1.0, 2.0, 5.0, 10.0, 15.0, 20.0, 30.0, 60.0];

/// Upper bounds of the first four latency zones; the fifth is unbounded
pub const ZONE_BOUNDS: [f64; 4] = [5.0, 10.0, 15.0, 20.0];

/// Strategy that produced an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Smalltalk,
    OrgChart,
    FormRequest,
    InternalRag,
    Faq,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 5] = [
        Self::Smalltalk,
        Self::OrgChart,
        Self::FormRequest,
        Self::InternalRag,
        Self::Faq,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Smalltalk => "smalltalk",
            Self::OrgChart => "org_chart",
            Self::FormRequest => "form_request",
            Self::InternalRag => "internal_rag",
            Self::Faq => "faq",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    Like,
    Dislike,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }
}

/// Observation emitted by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    ConversationStarted { date: NaiveDate, language: String },
    ResponseSucceeded { label: String, confidence: f64 },
    ResponseFailed { label: String, error_type: String },
    FeedbackGiven { label: String, feedback: FeedbackKind },
    TemplateUsed { template: TemplateKind, label: String },
    WeeklyResponse { label: String, at: DateTime<Local> },
    LatencyObserved { label: String, seconds: f64, success: bool },
}

/// `high` above 0.8, `medium` above 0.6, otherwise `low`
pub fn confidence_level(confidence: f64) -> &'static str {
    if confidence > 0.8 {
        "high"
    } else if confidence > 0.6 {
        "medium"
    } else {
        "low"
    }
}

/// Sum, count and per-zone counts of total response times
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyStats {
    pub total_sum: f64,
    pub total_count: u64,
    /// `<=5`, `<=10`, `<=15`, `<=20`, `+Inf`
    pub zone_counts: [u64; 5],
}

impl LatencyStats {
    pub fn zone_for(seconds: f64) -> usize {
        ZONE_BOUNDS
            .iter()
            .position(|&bound| seconds <= bound)
            .unwrap_or(ZONE_BOUNDS.len())
    }

    pub fn observe(&mut self, seconds: f64) {
        self.total_sum += seconds;
        self.total_count += 1;
        self.zone_counts[Self::zone_for(seconds)] += 1;
    }

    pub fn merged(&self, other: &LatencyStats) -> LatencyStats {
        let mut zone_counts = self.zone_counts;
        for (z, o) in zone_counts.iter_mut().zip(other.zone_counts) {
            *z += o;
        }
        LatencyStats {
            total_sum: self.total_sum + other.total_sum,
            total_count: self.total_count + other.total_count,
            zone_counts,
        }
    }

    pub fn mean(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.total_sum / self.total_count as f64
        }
    }
}

/// Accumulated value of one series in the dump file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DumpValue {
    #[serde(rename = "_value")]
    pub value: f64,
}

/// Family name to JSON-encoded label tuple to value
pub type MetricsDump = BTreeMap<String, BTreeMap<String, DumpValue>>;

/// Everything needed to rebuild a store after a restart
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub families: MetricsDump,
    pub latency: LatencyStats,
}

const DAILY_CONVERSATIONS: &str = "daily_conversations";
const RESPONSE_SUCCESS: &str = "response_success";
const RESPONSE_FAILURE: &str = "response_failure";
const USER_FEEDBACK: &str = "user_feedback";
const PROMPT_TEMPLATE_USAGE: &str = "prompt_template_usage";
const WEEKLY_RESPONSES: &str = "weekly_responses";
const AVERAGE_RESPONSE_TIME: &str = "average_response_time";

/// Registry of every chatbot metric
pub struct MetricsStore {
    daily_conversations: CounterVec,
    response_success: CounterVec,
    response_failure: CounterVec,
    user_feedback: CounterVec,
    prompt_template_usage: CounterVec,
    weekly_responses: CounterVec,
    average_response_time: GaugeVec,
    total_response_time: HistogramVec,
    latency_floor: RwLock<LatencyStats>,
    latency_live: Mutex<LatencyStats>,
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            daily_conversations: CounterVec::new(
                "chatbot_daily_conversations_total",
                "Total number of daily conversations",
                &["date", "language"],
            ),
            response_success: CounterVec::new(
                "chatbot_response_success_total",
                "Total number of successful responses",
                &["label_type", "confidence_level"],
            ),
            response_failure: CounterVec::new(
                "chatbot_response_failure_total",
                "Total number of failed responses",
                &["label_type", "error_type"],
            ),
            user_feedback: CounterVec::new(
                "chatbot_user_feedback_total",
                "Total number of user feedback ratings",
                &["label_type", "feedback_type"],
            ),
            prompt_template_usage: CounterVec::new(
                "chatbot_prompt_template_usage_total",
                "Usage count of prompt templates",
                &["template_type", "label_type"],
            ),
            weekly_responses: CounterVec::new(
                "chatbot_weekly_responses_total",
                "Total number of responses per week",
                &["week", "label_type", "day_of_week"],
            ),
            average_response_time: GaugeVec::new(
                "chatbot_average_response_time_seconds",
                "Average response time in seconds",
                &["label_type", "time_window"],
            ),
            total_response_time: HistogramVec::new(
                "chatbot_total_response_time_seconds",
                "Total response time in seconds",
                &["label_type", "success_status"],
                LATENCY_BUCKETS.to_vec(),
            ),
            latency_floor: RwLock::new(LatencyStats::default()),
            latency_live: Mutex::new(LatencyStats::default()),
        }
    }

    /// Apply one event
    pub fn record(&self, event: MetricEvent) {
        match event {
            MetricEvent::ConversationStarted { date, language } => {
                let date = date.format("%Y-%m-%d").to_string();
                self.daily_conversations
                    .with_label_values(&[&date, &language])
                    .inc();
            }
            MetricEvent::ResponseSucceeded { label, confidence } => {
                self.response_success
                    .with_label_values(&[&label, confidence_level(confidence)])
                    .inc();
            }
            MetricEvent::ResponseFailed { label, error_type } => {
                self.response_failure
                    .with_label_values(&[&label, &error_type])
                    .inc();
            }
            MetricEvent::FeedbackGiven { label, feedback } => {
                self.user_feedback
                    .with_label_values(&[&label, feedback.as_str()])
                    .inc();
            }
            MetricEvent::TemplateUsed { template, label } => {
                self.prompt_template_usage
                    .with_label_values(&[template.as_str(), &label])
                    .inc();
            }
            MetricEvent::WeeklyResponse { label, at } => {
                let week = at.format("%Y-W%U").to_string();
                let day = at.format("%A").to_string();
                self.weekly_responses
                    .with_label_values(&[&week, &label, &day])
                    .inc();
            }
            MetricEvent::LatencyObserved {
                label,
                seconds,
                success,
            } => self.observe_latency(&label, seconds, success),
        }
    }

    pub fn record_conversation(&self, language: &str) {
        self.record(MetricEvent::ConversationStarted {
            date: Local::now().date_naive(),
            language: language.to_string(),
        });
    }

    pub fn record_success(&self, label: &str, confidence: f64) {
        self.record(MetricEvent::ResponseSucceeded {
            label: label.to_string(),
            confidence,
        });
    }

    pub fn record_failure(&self, error_type: &str, label: &str) {
        self.record(MetricEvent::ResponseFailed {
            label: label.to_string(),
            error_type: error_type.to_string(),
        });
    }

    pub fn record_feedback(&self, label: &str, feedback: FeedbackKind) {
        self.record(MetricEvent::FeedbackGiven {
            label: label.to_string(),
            feedback,
        });
    }

    pub fn record_template(&self, template: TemplateKind, label: &str) {
        self.record(MetricEvent::TemplateUsed {
            template,
            label: label.to_string(),
        });
    }

    pub fn record_weekly(&self, label: &str) {
        self.record(MetricEvent::WeeklyResponse {
            label: label.to_string(),
            at: Local::now(),
        });
    }

    pub fn record_latency(&self, label: &str, seconds: f64, success: bool) {
        self.record(MetricEvent::LatencyObserved {
            label: label.to_string(),
            seconds,
            success,
        });
    }

    fn observe_latency(&self, label: &str, seconds: f64, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.total_response_time
            .with_label_values(&[label, status])
            .observe(seconds);
        self.latency_live.lock().observe(seconds);

        // Running mean over both outcomes for the label
        let (sum, count) = self
            .total_response_time
            .children()
            .iter()
            .filter(|(values, _)| values[0] == label)
            .fold((0.0, 0u64), |(s, c), (_, h)| (s + h.get_sum(), c + h.get_count()));
        if count > 0 {
            self.average_response_time
                .with_label_values(&[label, "all"])
                .set(sum / count as f64);
        }
        debug!(label, seconds, success, "Recorded response time");
    }

    /// Latency restored at startup
    pub fn latency_floor(&self) -> LatencyStats {
        self.latency_floor.read().clone()
    }

    /// Floor plus everything observed since
    pub fn latency_totals(&self) -> LatencyStats {
        self.latency_floor.read().merged(&self.latency_live.lock())
    }

    /// Every exported series
    pub fn samples(&self) -> Vec<Sample> {
        let mut out = Vec::new();
        for family in self.counters() {
            family.collect(&mut out);
        }
        self.average_response_time.collect(&mut out);
        self.total_response_time.collect(&mut out);
        out
    }

    /// Prometheus text exposition
    pub fn render(&self) -> String {
        let mut out = String::new();
        for family in self.counters() {
            family.render(&mut out);
        }
        self.average_response_time.render(&mut out);
        self.total_response_time.render(&mut out);
        out
    }

    fn counters(&self) -> [&CounterVec; 6] {
        [
            &self.daily_conversations,
            &self.response_success,
            &self.response_failure,
            &self.user_feedback,
            &self.prompt_template_usage,
            &self.weekly_responses,
        ]
    }

    fn counter_by_name(&self, name: &str) -> Option<&CounterVec> {
        match name {
            DAILY_CONVERSATIONS => Some(&self.daily_conversations),
            RESPONSE_SUCCESS => Some(&self.response_success),
            RESPONSE_FAILURE => Some(&self.response_failure),
            USER_FEEDBACK => Some(&self.user_feedback),
            PROMPT_TEMPLATE_USAGE => Some(&self.prompt_template_usage),
            WEEKLY_RESPONSES => Some(&self.weekly_responses),
            _ => None,
        }
    }

    /// Point-in-time copy of the durable state
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut families = MetricsDump::new();
        let named = [
            (DAILY_CONVERSATIONS, &self.daily_conversations),
            (RESPONSE_SUCCESS, &self.response_success),
            (RESPONSE_FAILURE, &self.response_failure),
            (USER_FEEDBACK, &self.user_feedback),
            (PROMPT_TEMPLATE_USAGE, &self.prompt_template_usage),
            (WEEKLY_RESPONSES, &self.weekly_responses),
        ];
        for (name, family) in named {
            let series = family
                .children()
                .into_iter()
                .map(|(values, c)| (encode_key(&values), DumpValue { value: c.get() as f64 }))
                .collect();
            families.insert(name.to_string(), series);
        }
        let gauges = self
            .average_response_time
            .children()
            .into_iter()
            .map(|(values, g)| (encode_key(&values), DumpValue { value: g.get() }))
            .collect();
        families.insert(AVERAGE_RESPONSE_TIME.to_string(), gauges);

        MetricsSnapshot {
            families,
            latency: self.latency_totals(),
        }
    }

    /// Replace the in-memory state with a snapshot.
    ///
    /// The snapshot's latency becomes the new floor and the live window starts
    /// empty, so totals stay equal to the snapshot until new observations.
    pub fn restore(&self, snapshot: &MetricsSnapshot) {
        for (name, series) in &snapshot.families {
            if name == AVERAGE_RESPONSE_TIME {
                for (key, dump) in series {
                    match decode_key(key, 2) {
                        Some(values) => {
                            let refs: Vec<&str> = values.iter().map(String::as_str).collect();
                            self.average_response_time.with_label_values(&refs).set(dump.value);
                        }
                        None => warn!(family = %name, key = %key, "Skipping malformed series key"),
                    }
                }
                continue;
            }

            let Some(family) = self.counter_by_name(name) else {
                warn!(family = %name, "Unknown metric family in dump");
                continue;
            };
            for (key, dump) in series {
                match decode_key(key, family.label_names().len()) {
                    Some(values) => {
                        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
                        family.with_label_values(&refs).set(dump.value.max(0.0) as u64);
                    }
                    None => warn!(family = %name, key = %key, "Skipping malformed series key"),
                }
            }
        }

        self.total_response_time.clear();
        *self.latency_floor.write() = snapshot.latency.clone();
        *self.latency_live.lock() = LatencyStats::default();
    }

    /// Write the dump and latency files
    pub async fn save(&self, dump_file: &Path, latency_file: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        write_json(dump_file, &snapshot.families).await?;
        write_json(latency_file, &snapshot.latency).await?;
        info!(
            dump = %dump_file.display(),
            latency = %latency_file.display(),
            "Saved metrics"
        );
        Ok(())
    }

    /// Restore from the dump and latency files; missing files count as empty.
    pub async fn load(&self, dump_file: &Path, latency_file: &Path) -> Result<()> {
        let mut snapshot = MetricsSnapshot::default();
        if tokio::fs::try_exists(dump_file).await? {
            let raw = tokio::fs::read_to_string(dump_file).await?;
            snapshot.families = serde_json::from_str(&raw)?;
        }
        if tokio::fs::try_exists(latency_file).await? {
            let raw = tokio::fs::read_to_string(latency_file).await?;
            snapshot.latency = serde_json::from_str(&raw)?;
        }
        self.restore(&snapshot);
        info!(
            families = snapshot.families.len(),
            latency_count = snapshot.latency.total_count,
            "Restored metrics"
        );
        Ok(())
    }
}

fn encode_key(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_default()
}

fn decode_key(key: &str, arity: usize) -> Option<Vec<String>> {
    let values: Vec<String> = serde_json::from_str(key).ok()?;
    (values.len() == arity).then_some(values)
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, serde_json::to_vec(value)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn value_of(store: &MetricsStore, name: &str, label: (&str, &str)) -> f64 {
        store
            .samples()
            .into_iter()
            .filter(|s| s.name == name && s.label(label.0) == Some(label.1))
            .map(|s| s.value)
            .sum()
    }

    #[test]
    fn test_confidence_levels() {
        assert_eq!(confidence_level(0.95), "high");
        assert_eq!(confidence_level(0.8), "medium");
        assert_eq!(confidence_level(0.61), "medium");
        assert_eq!(confidence_level(0.6), "low");
    }

    #[test]
    fn test_latency_zones() {
        assert_eq!(LatencyStats::zone_for(4.9), 0);
        assert_eq!(LatencyStats::zone_for(5.0), 0);
        assert_eq!(LatencyStats::zone_for(20.0), 3);
        assert_eq!(LatencyStats::zone_for(21.0), 4);
    }

    #[test]
    fn test_record_latency_updates_live_stats() {
        let store = MetricsStore::new();
        store.record_latency("__label__smalltalk", 4.9, true);
        store.record_latency("__label__smalltalk", 20.0, true);
        store.record_latency("__label__smalltalk", 21.0, false);

        let totals = store.latency_totals();
        assert_eq!(totals.total_count, 3);
        assert_eq!(totals.zone_counts, [1, 0, 0, 1, 1]);
        assert!((totals.mean() - 15.3).abs() < 1e-9);
        assert!(
            (value_of(&store, "chatbot_average_response_time_seconds", ("label_type", "__label__smalltalk")) - 15.3).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_weekly_labels() {
        let store = MetricsStore::new();
        // 2024-01-03 is a Wednesday in week 00 (%U counts from the first Sunday)
        let at = Local.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        store.record(MetricEvent::WeeklyResponse {
            label: "__label__org_chart".to_string(),
            at,
        });

        let sample = store
            .samples()
            .into_iter()
            .find(|s| s.name == "chatbot_weekly_responses_total")
            .unwrap();
        assert_eq!(sample.label("week"), Some("2024-W00"));
        assert_eq!(sample.label("day_of_week"), Some("Wednesday"));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let store = MetricsStore::new();
        store.record(MetricEvent::ConversationStarted {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            language: "KO".to_string(),
        });
        store.record_success("__label__smalltalk", 0.9);
        store.record_success("__label__smalltalk", 0.9);
        store.record_failure("system_error", "unknown");
        store.record_feedback("__label__org_chart", FeedbackKind::Like);
        store.record_template(TemplateKind::Faq, "__label__internal_info");
        store.record_weekly("guardrail");
        store.record_latency("guardrail", 3.0, true);
        store.record_latency("guardrail", 12.0, true);

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.families[DAILY_CONVERSATIONS]["[\"2024-01-01\",\"KO\"]"].value,
            1.0
        );

        let restored = MetricsStore::new();
        restored.restore(&snapshot);

        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.latency_totals(), store.latency_totals());
        assert_eq!(restored.latency_floor().zone_counts, [1, 0, 1, 0, 0]);
    }

    #[test]
    fn test_restore_accepts_spaced_keys() {
        // Dumps written by other tooling put a space after the comma
        let mut families = MetricsDump::new();
        families.insert(
            USER_FEEDBACK.to_string(),
            BTreeMap::from([(
                "[\"__label__smalltalk\", \"dislike\"]".to_string(),
                DumpValue { value: 4.0 },
            )]),
        );

        let store = MetricsStore::new();
        store.restore(&MetricsSnapshot {
            families,
            latency: LatencyStats::default(),
        });
        assert_eq!(
            value_of(&store, "chatbot_user_feedback_total", ("feedback_type", "dislike")),
            4.0
        );
    }

    #[test]
    fn test_restore_skips_malformed_keys() {
        let mut families = MetricsDump::new();
        families.insert(
            RESPONSE_SUCCESS.to_string(),
            BTreeMap::from([
                ("not json".to_string(), DumpValue { value: 1.0 }),
                ("[\"only-one\"]".to_string(), DumpValue { value: 1.0 }),
            ]),
        );
        let store = MetricsStore::new();
        store.restore(&MetricsSnapshot {
            families,
            latency: LatencyStats::default(),
        });
        assert!(store
            .samples()
            .iter()
            .all(|s| s.name != "chatbot_response_success_total"));
    }

    #[tokio::test]
    async fn test_save_and_load_files() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("metrics_dump.json");
        let latency = dir.path().join("prometheus").join("response_time_stats.json");

        let store = MetricsStore::new();
        store.record_success("__label__form_request", 0.7);
        store.record_latency("__label__form_request", 7.5, true);
        store.save(&dump, &latency).await.unwrap();

        let raw = std::fs::read_to_string(&latency).unwrap();
        let stats: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stats["total_count"], 1);
        assert_eq!(stats["zone_counts"], serde_json::json!([0, 1, 0, 0, 0]));

        let restored = MetricsStore::new();
        restored.load(&dump, &latency).await.unwrap();
        assert_eq!(restored.latency_totals().total_count, 1);
        assert_eq!(
            value_of(&restored, "chatbot_response_success_total", ("confidence_level", "medium")),
            1.0
        );
    }

    #[tokio::test]
    async fn test_load_missing_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricsStore::new();
        store
            .load(&dir.path().join("a.json"), &dir.path().join("b.json"))
            .await
            .unwrap();
        assert_eq!(store.latency_totals(), LatencyStats::default());
    }

    #[test]
    fn test_render_contains_families() {
        let store = MetricsStore::new();
        store.record_conversation("KO");
        store.record_latency("__label__smalltalk", 1.5, true);

        let text = store.render();
        assert!(text.contains("# TYPE chatbot_daily_conversations_total counter"));
        assert!(text.contains("chatbot_total_response_time_seconds_bucket{label_type=\"__label__smalltalk\",success_status=\"success\",le=\"2.0\"} 1"));
    }
}
