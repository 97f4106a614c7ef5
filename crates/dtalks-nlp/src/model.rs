//! Trainable text classifier.
//!
//! [`TextModel`] is the seam the hybrid classifier talks to. The bundled
//! [`NaiveBayesModel`] is a multinomial naive Bayes over word unigrams, word
//! bigrams and character bigrams, with hashed sentence vectors for the
//! centroid distance step.

use dtalks_core::{Label, LABEL_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{NlpError, Result};
use crate::preprocess::{preprocess_text, tokenize};

/// Dimension of the hashed sentence vectors
pub const DEFAULT_VECTOR_DIM: usize = 100;

/// A supervised text classifier that can also embed sentences.
#[cfg_attr(test, mockall::automock)]
pub trait TextModel: Send + Sync {
    /// Top-`k` labels with probabilities, best first
    fn predict(&self, text: &str, k: usize) -> Result<Vec<(Label, f64)>>;

    /// Fixed-size vector for the text
    fn sentence_vector(&self, text: &str) -> Result<Vec<f32>>;
}

/// One `__label__x text` line of a training file
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub label: Label,
    pub text: String,
}

/// Parse training lines, skipping blanks and lines without a label tag.
pub fn parse_training_data(contents: &str) -> Vec<TrainingExample> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (tag, text) = line.split_once(' ')?;
            if !tag.starts_with(LABEL_PREFIX) || text.trim().is_empty() {
                return None;
            }
            Some(TrainingExample {
                label: Label::from_tag(tag),
                text: text.trim().to_string(),
            })
        })
        .collect()
}

/// Multinomial naive Bayes with Laplace smoothing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    labels: Vec<Label>,
    doc_counts: Vec<u64>,
    feature_counts: Vec<HashMap<String, u64>>,
    feature_totals: Vec<u64>,
    vocabulary_size: usize,
    dim: usize,
}

impl NaiveBayesModel {
    /// Train from labelled examples
    pub fn train(examples: &[TrainingExample], dim: usize) -> Result<Self> {
        if examples.is_empty() {
            return Err(NlpError::training("no training examples"));
        }
        if dim == 0 {
            return Err(NlpError::validation("vector dimension must be positive"));
        }

        let mut index: HashMap<Label, usize> = HashMap::new();
        let mut labels = Vec::new();
        let mut doc_counts = Vec::new();
        let mut feature_counts: Vec<HashMap<String, u64>> = Vec::new();
        let mut vocabulary = std::collections::HashSet::new();

        for example in examples {
            let slot = *index.entry(example.label.clone()).or_insert_with(|| {
                labels.push(example.label.clone());
                doc_counts.push(0);
                feature_counts.push(HashMap::new());
                labels.len() - 1
            });
            doc_counts[slot] += 1;
            for feature in features(&example.text) {
                vocabulary.insert(feature.clone());
                *feature_counts[slot].entry(feature).or_insert(0) += 1;
            }
        }

        let feature_totals = feature_counts.iter().map(|m| m.values().sum()).collect();

        info!(
            examples = examples.len(),
            labels = labels.len(),
            vocabulary = vocabulary.len(),
            "Trained naive Bayes model"
        );

        Ok(Self {
            labels,
            doc_counts,
            feature_counts,
            feature_totals,
            vocabulary_size: vocabulary.len(),
            dim,
        })
    }

    /// Load a model saved with [`NaiveBayesModel::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let model: Self = serde_json::from_str(&raw)?;
        model.validate()?;
        Ok(model)
    }

    /// Shape checks for a deserialized model
    fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(NlpError::model("model file has no labels"));
        }
        if self.dim == 0 {
            return Err(NlpError::model("model vector dimension must be positive"));
        }
        let n = self.labels.len();
        for (name, len) in [
            ("doc_counts", self.doc_counts.len()),
            ("feature_counts", self.feature_counts.len()),
            ("feature_totals", self.feature_totals.len()),
        ] {
            if len != n {
                return Err(NlpError::model(format!(
                    "model {} has {} entries for {} labels",
                    name, len, n
                )));
            }
        }
        if self.doc_counts.iter().sum::<u64>() == 0 {
            return Err(NlpError::model("model has no training documents"));
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_vec(self)?)?;
        debug!(path = %path.display(), "Saved model");
        Ok(())
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn is_known(&self, feature: &str) -> bool {
        self.feature_counts.iter().any(|m| m.contains_key(feature))
    }
}

impl TextModel for NaiveBayesModel {
    fn predict(&self, text: &str, k: usize) -> Result<Vec<(Label, f64)>> {
        if self.labels.is_empty() {
            return Err(NlpError::model("model has no labels"));
        }

        let feats: Vec<String> = features(text)
            .into_iter()
            .filter(|f| self.is_known(f))
            .collect();
        let total_docs: u64 = self.doc_counts.iter().sum();
        let vocab = self.vocabulary_size as f64;

        let log_scores: Vec<f64> = (0..self.labels.len())
            .map(|i| {
                let prior = (self.doc_counts[i] as f64 / total_docs as f64).ln();
                let denom = self.feature_totals[i] as f64 + vocab;
                feats.iter().fold(prior, |acc, f| {
                    let count = self.feature_counts[i].get(f).copied().unwrap_or(0) as f64;
                    acc + ((count + 1.0) / denom).ln()
                })
            })
            .collect();

        // softmax over log scores
        let max = log_scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = log_scores.iter().map(|s| (s - max).exp()).collect();
        let norm: f64 = exps.iter().sum();

        let mut ranked: Vec<(Label, f64)> = self
            .labels
            .iter()
            .cloned()
            .zip(exps.into_iter().map(|e| e / norm))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k.max(1));
        Ok(ranked)
    }

    fn sentence_vector(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for feature in features(text) {
            let hash = fnv1a(feature.as_bytes());
            let idx = (hash % self.dim as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            vector[idx] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// Word unigrams, word bigrams and per-word character bigrams
fn features(text: &str) -> Vec<String> {
    let tokens = tokenize(&preprocess_text(text));
    let mut out = Vec::with_capacity(tokens.len() * 4);

    for token in &tokens {
        out.push(format!("w:{}", token));
        let chars: Vec<char> = token.chars().collect();
        for pair in chars.windows(2) {
            out.push(format!("c:{}{}", pair[0], pair[1]));
        }
    }
    for pair in tokens.windows(2) {
        out.push(format!("b:{} {}", pair[0], pair[1]));
    }
    out
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
