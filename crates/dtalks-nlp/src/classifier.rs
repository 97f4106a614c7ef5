//! Hybrid intent classification.
//!
//! Keyword rules first, then the learned model's top-k candidates re-ranked
//! by Euclidean distance to per-label centroids. Every failure degrades to a
//! lower tier instead of surfacing to the caller.

use dtalks_core::{ClassificationResult, ClassifierConfig, Label};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::centroid::{compute_centroids, CentroidStore};
use crate::error::{NlpError, Result};
use crate::model::{parse_training_data, NaiveBayesModel, TextModel, DEFAULT_VECTOR_DIM};
use crate::preprocess::preprocess_text;
use crate::rules::KeywordRules;

/// Distance at which the centroid stops contributing to confidence
const DISTANCE_THRESHOLD: f64 = 1.0;

/// Label reported when no model is available at all
const UNKNOWN_LABEL: &str = "unknown";

/// Summary of a retraining run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingReport {
    pub examples: usize,
    pub labels: usize,
}

/// Rule + model + centroid classifier shared across conversations.
pub struct HybridIntentClassifier {
    model: RwLock<Option<Arc<dyn TextModel>>>,
    centroids: Arc<CentroidStore>,
    rules: KeywordRules,
    model_path: PathBuf,
    retrain_lock: Mutex<()>,
}

impl HybridIntentClassifier {
    pub fn new(model: Option<Arc<dyn TextModel>>, centroids: Arc<CentroidStore>) -> Self {
        Self {
            model: RwLock::new(model),
            centroids,
            rules: KeywordRules::default(),
            model_path: PathBuf::from("./pretrained/model.json"),
            retrain_lock: Mutex::new(()),
        }
    }

    /// Load the persisted model and centroids named in the config.
    ///
    /// A missing or unreadable model is logged and leaves the classifier in
    /// rules-only mode until the next retrain.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let model: Option<Arc<dyn TextModel>> = match NaiveBayesModel::load(&config.model_path) {
            Ok(model) => {
                info!(path = %config.model_path, labels = model.labels().len(), "Loaded intent model");
                Some(Arc::new(model))
            }
            Err(e) => {
                warn!(path = %config.model_path, error = %e, "Intent model unavailable");
                None
            }
        };
        let centroids = Arc::new(CentroidStore::open(&config.centroids_path)?);
        Ok(Self::new(model, centroids).with_model_path(&config.model_path))
    }

    pub fn with_rules(mut self, rules: KeywordRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_model_path(mut self, path: impl AsRef<Path>) -> Self {
        self.model_path = path.as_ref().to_path_buf();
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.read().is_some()
    }

    pub fn centroids(&self) -> &Arc<CentroidStore> {
        &self.centroids
    }

    /// Classify `text` considering the model's top `k` candidates.
    #[instrument(skip(self))]
    pub fn classify(&self, text: &str, k: usize) -> ClassificationResult {
        if let Some(label) = self.rules.check(text) {
            debug!(label = %label, "Keyword rule matched");
            return ClassificationResult::new(label, 1.0);
        }

        let Some(model) = self.model.read().clone() else {
            warn!("No intent model loaded, returning unknown");
            return unknown();
        };

        let processed = preprocess_text(text);

        if self.centroids.is_empty() {
            return top_one(model.as_ref(), &processed);
        }

        let candidates = match model.predict(&processed, k.max(1)) {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => return unknown(),
            Err(e) => {
                warn!(error = %e, "Top-k prediction failed");
                return top_one(model.as_ref(), &processed);
            }
        };
        let raw = ClassificationResult::new(candidates[0].0.clone(), candidates[0].1);

        let vector = match model.sentence_vector(&processed) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Sentence vector failed, using model ranking");
                return raw;
            }
        };

        // Candidates are in model order, so the strict comparison keeps the
        // model's preference on ties.
        let mut best: Option<(&Label, f64, f64)> = None;
        for (label, confidence) in &candidates {
            let Some(centroid) = self.centroids.get(label) else {
                continue;
            };
            let Some(distance) = euclidean(&vector, &centroid) else {
                continue;
            };
            if best.map_or(true, |(_, d, _)| distance < d) {
                best = Some((label, distance, *confidence));
            }
        }

        let Some((label, distance, original)) = best else {
            debug!("No candidate has a centroid, using model ranking");
            return raw;
        };

        let adjusted = adjust_confidence(original, distance);
        debug!(label = %label, distance, original, adjusted, "Hybrid classification");
        ClassificationResult::new(label.clone(), adjusted)
    }

    /// Apply like/dislike feedback to the label's centroid and persist it.
    ///
    /// Returns the centroid map after the update. Failures are logged and
    /// leave the map unchanged.
    #[instrument(skip(self, text))]
    pub async fn feedback(
        &self,
        text: &str,
        label: &Label,
        is_correct: bool,
        rate: f32,
    ) -> HashMap<Label, Vec<f32>> {
        let model = self.model.read().clone();
        let Some(model) = model else {
            warn!("No intent model loaded, feedback ignored");
            return self.centroids.snapshot();
        };

        let vector = match model.sentence_vector(&preprocess_text(text)) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Sentence vector failed, feedback ignored");
                return self.centroids.snapshot();
            }
        };

        if self.centroids.update(label, &vector, is_correct, rate) {
            if let Err(e) = self.centroids.save().await {
                warn!(error = %e, "Failed to persist centroids");
            }
            info!(label = %label, is_correct, "Centroid updated from feedback");
        }
        self.centroids.snapshot()
    }

    /// Retrain the bundled model from a `__label__x text` file, recompute the
    /// centroids, persist both and swap them in.
    #[instrument(skip(self))]
    pub async fn retrain(&self, train_file: &Path) -> Result<TrainingReport> {
        let _guard = self.retrain_lock.lock().await;

        let contents = tokio::fs::read_to_string(train_file).await?;
        let examples = parse_training_data(&contents);
        if examples.is_empty() {
            return Err(NlpError::training(format!(
                "no labelled lines in {}",
                train_file.display()
            )));
        }

        let model_path = self.model_path.clone();
        let (model, centroids, report) = tokio::task::spawn_blocking(move || {
            let model = NaiveBayesModel::train(&examples, DEFAULT_VECTOR_DIM)?;
            let centroids = compute_centroids(&model, &examples)?;
            model.save(&model_path)?;
            let report = TrainingReport {
                examples: examples.len(),
                labels: model.labels().len(),
            };
            Ok::<_, NlpError>((model, centroids, report))
        })
        .await
        .map_err(|e| NlpError::training(e.to_string()))??;

        self.centroids.replace(centroids);
        self.centroids.save().await?;
        *self.model.write() = Some(Arc::new(model));

        info!(examples = report.examples, labels = report.labels, "Intent model retrained");
        Ok(report)
    }
}

/// `original * (0.7 + 0.3 * max(0, (T - d) / T))`, clamped to `[0, 1]`
pub fn adjust_confidence(original: f64, distance: f64) -> f64 {
    let factor = ((DISTANCE_THRESHOLD - distance) / DISTANCE_THRESHOLD).max(0.0);
    (original * (0.7 + 0.3 * factor)).clamp(0.0, 1.0)
}

fn euclidean(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    Some(sum.sqrt())
}

fn top_one(model: &dyn TextModel, processed: &str) -> ClassificationResult {
    match model.predict(processed, 1) {
        Ok(ranked) => ranked
            .into_iter()
            .next()
            .map(|(label, confidence)| ClassificationResult::new(label, confidence))
            .unwrap_or_else(unknown),
        Err(e) => {
            warn!(error = %e, "Model prediction failed");
            unknown()
        }
    }
}

fn unknown() -> ClassificationResult {
    ClassificationResult::new(Label::Other(UNKNOWN_LABEL.to_string()), 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockTextModel;

    fn store(dir: &tempfile::TempDir, centroids: Vec<(Label, Vec<f32>)>) -> Arc<CentroidStore> {
        Arc::new(CentroidStore::with_centroids(
            dir.path().join("centroids.json"),
            centroids.into_iter().collect(),
        ))
    }

    fn classifier(model: MockTextModel, centroids: Arc<CentroidStore>) -> HybridIntentClassifier {
        HybridIntentClassifier::new(Some(Arc::new(model)), centroids)
    }

    #[test]
    fn test_rule_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        // no expectations: any model call would panic
        let c = classifier(MockTextModel::new(), store(&dir, vec![]));
        let result = c.classify("휴가 신청서 양식 있나요", 2);
        assert_eq!(result.label, Label::FormRequest);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_no_centroids_uses_model_top_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model
            .expect_predict()
            .withf(|_, k| *k == 1)
            .returning(|_, _| Ok(vec![(Label::Smalltalk, 0.83)]));
        let c = classifier(model, store(&dir, vec![]));

        let result = c.classify("오늘 기분 어때", 3);
        assert_eq!(result.label, Label::Smalltalk);
        assert!((result.confidence - 0.83).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_centroid_is_selected() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model.expect_predict().returning(|_, _| {
            Ok(vec![(Label::Smalltalk, 0.6), (Label::InternalInfo, 0.3)])
        });
        model.expect_sentence_vector().returning(|_| Ok(vec![0.0, 1.0]));
        let c = classifier(
            model,
            store(
                &dir,
                vec![
                    (Label::Smalltalk, vec![1.0, 0.0]),
                    (Label::InternalInfo, vec![0.0, 1.0]),
                ],
            ),
        );

        let result = c.classify("점심 시간 언제야", 2);
        assert_eq!(result.label, Label::InternalInfo);
        // distance 0 keeps the full original confidence
        assert!((result.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_tie_keeps_model_top_choice() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model.expect_predict().returning(|_, _| {
            Ok(vec![(Label::OrgChart, 0.5), (Label::Smalltalk, 0.4)])
        });
        model.expect_sentence_vector().returning(|_| Ok(vec![0.0, 0.0]));
        let c = classifier(
            model,
            store(
                &dir,
                vec![
                    (Label::OrgChart, vec![0.5, 0.0]),
                    (Label::Smalltalk, vec![0.0, 0.5]),
                ],
            ),
        );

        assert_eq!(c.classify("누구야", 2).label, Label::OrgChart);
    }

    #[test]
    fn test_candidates_without_centroid_fall_back_to_raw() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model
            .expect_predict()
            .returning(|_, _| Ok(vec![(Label::Smalltalk, 0.7)]));
        model.expect_sentence_vector().returning(|_| Ok(vec![0.0]));
        let c = classifier(model, store(&dir, vec![(Label::OrgChart, vec![0.0])]));

        let result = c.classify("안녕", 1);
        assert_eq!(result.label, Label::Smalltalk);
        assert!((result.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_embedding_failure_still_returns_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model
            .expect_predict()
            .returning(|_, _| Ok(vec![(Label::Smalltalk, 0.7)]));
        model
            .expect_sentence_vector()
            .returning(|_| Err(NlpError::model("embedding backend down")));
        let c = classifier(model, store(&dir, vec![(Label::Smalltalk, vec![0.0])]));

        let result = c.classify("안녕", 1);
        assert_eq!(result.label, Label::Smalltalk);
        assert!((result.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_failure_returns_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model
            .expect_predict()
            .returning(|_, _| Err(NlpError::model("corrupt")));
        let c = classifier(model, store(&dir, vec![(Label::Smalltalk, vec![0.0])]));

        let result = c.classify("안녕", 2);
        assert_eq!(result.label, Label::Other("unknown".to_string()));
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_missing_model_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let c = HybridIntentClassifier::new(None, store(&dir, vec![]));
        assert!(!c.has_model());
        assert_eq!(c.classify("안녕", 1).confidence, 0.0);
        // rules still apply
        assert_eq!(c.classify("조직도", 1).label, Label::OrgChart);
    }

    #[test]
    fn test_confidence_monotonic_in_proximity() {
        let far = adjust_confidence(0.8, 0.9);
        let mid = adjust_confidence(0.8, 0.5);
        let near = adjust_confidence(0.8, 0.1);
        assert!(far <= mid && mid <= near);
        assert!((mid - 0.68).abs() < 1e-9);
        // beyond the threshold the factor bottoms out at 0.7
        assert!((adjust_confidence(0.8, 3.0) - 0.56).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_feedback_updates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model.expect_sentence_vector().returning(|_| Ok(vec![1.0, 1.0]));
        let centroids = store(&dir, vec![(Label::Smalltalk, vec![0.0, 0.0])]);
        let c = classifier(model, centroids);

        let map = c.feedback("점심 뭐 먹지", &Label::Smalltalk, true, 0.1).await;
        let updated = &map[&Label::Smalltalk];
        assert!((updated[0] - 0.1).abs() < 1e-6);

        let on_disk = CentroidStore::load(&dir.path().join("centroids.json")).unwrap();
        assert!((on_disk[&Label::Smalltalk][1] - 0.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_feedback_for_unknown_label_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = MockTextModel::new();
        model.expect_sentence_vector().returning(|_| Ok(vec![1.0]));
        let c = classifier(model, store(&dir, vec![(Label::Smalltalk, vec![0.0])]));

        let map = c.feedback("누구", &Label::OrgChart, false, 0.1).await;
        assert!(!map.contains_key(&Label::OrgChart));
        assert!(!dir.path().join("centroids.json").exists());
    }

    #[tokio::test]
    async fn test_retrain_swaps_model_and_centroids() {
        let dir = tempfile::tempdir().unwrap();
        let train = dir.path().join("train.txt");
        std::fs::write(
            &train,
            "__label__smalltalk 점심 메뉴 추천해줘\n\
             __label__smalltalk 오늘 날씨 좋네요\n\
             __label__smalltalk 점심 뭐 먹을까\n\
             __label__scheduling 회의 일정 알려줘\n\
             __label__scheduling 내일 회의 언제예요\n",
        )
        .unwrap();

        let c = HybridIntentClassifier::new(None, store(&dir, vec![]))
            .with_model_path(dir.path().join("model.json"));
        let report = c.retrain(&train).await.unwrap();

        assert_eq!(report, TrainingReport { examples: 5, labels: 2 });
        assert!(c.has_model());
        assert_eq!(c.centroids().len(), 2);
        assert!(dir.path().join("model.json").exists());
        assert!(dir.path().join("centroids.json").exists());

        let result = c.classify("점심 메뉴 뭐야", 1);
        assert_eq!(result.label, Label::Smalltalk);
        assert!(result.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_retrain_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let train = dir.path().join("train.txt");
        std::fs::write(&train, "\n\n").unwrap();
        let c = HybridIntentClassifier::new(None, store(&dir, vec![]));
        assert!(c.retrain(&train).await.is_err());
        assert!(!c.has_model());
    }
}
