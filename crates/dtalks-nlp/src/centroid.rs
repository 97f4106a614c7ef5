//! Persistent per-label centroid vectors.

use dashmap::DashMap;
use dtalks_core::Label;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{TextModel, TrainingExample};

/// Label to mean-embedding map backed by a JSON file.
///
/// Updates lock the label's entry, so concurrent feedback on the same label
/// is applied one at a time. Saves are serialised and written atomically.
pub struct CentroidStore {
    path: PathBuf,
    centroids: DashMap<Label, Vec<f32>>,
    save_lock: Mutex<()>,
}

impl CentroidStore {
    /// Open the store, loading whatever is on disk
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let loaded = Self::load(&path)?;
        info!(path = %path.display(), labels = loaded.len(), "Loaded centroids");
        Ok(Self::with_centroids(path, loaded))
    }

    pub fn with_centroids(path: impl Into<PathBuf>, centroids: HashMap<Label, Vec<f32>>) -> Self {
        Self {
            path: path.into(),
            centroids: centroids.into_iter().collect(),
            save_lock: Mutex::new(()),
        }
    }

    /// Read a centroid file; a missing file yields an empty map
    pub fn load(path: &Path) -> Result<HashMap<Label, Vec<f32>>> {
        if !path.exists() {
            warn!(path = %path.display(), "No centroid file, starting empty");
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let by_tag: BTreeMap<String, Vec<f32>> = serde_json::from_str(&raw)?;
        Ok(by_tag
            .into_iter()
            .map(|(tag, v)| (Label::from_tag(&tag), v))
            .collect())
    }

    /// Write the current map to disk
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        let by_tag: BTreeMap<String, Vec<f32>> = self
            .centroids
            .iter()
            .map(|e| (e.key().tag(), e.value().clone()))
            .collect();
        let body = serde_json::to_vec(&by_tag)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), labels = by_tag.len(), "Saved centroids");
        Ok(())
    }

    /// Move the label's centroid toward (positive) or away from (negative)
    /// the example.
    ///
    /// Positive: `c + rate * (v - c)`. Negative: `c - rate / 2 * (v - c)`.
    /// Returns false when the label has no centroid or the dimensions differ.
    pub fn update(&self, label: &Label, example: &[f32], is_positive: bool, rate: f32) -> bool {
        let Some(mut centroid) = self.centroids.get_mut(label) else {
            debug!(label = %label, "No centroid for label, feedback ignored");
            return false;
        };
        if centroid.len() != example.len() {
            warn!(
                label = %label,
                expected = centroid.len(),
                actual = example.len(),
                "Feedback vector dimension mismatch"
            );
            return false;
        }

        let step = if is_positive { rate } else { -rate / 2.0 };
        for (c, v) in centroid.iter_mut().zip(example) {
            *c += step * (v - *c);
        }
        true
    }

    pub fn get(&self, label: &Label) -> Option<Vec<f32>> {
        self.centroids.get(label).map(|c| c.clone())
    }

    pub fn snapshot(&self) -> HashMap<Label, Vec<f32>> {
        self.centroids
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Swap in a freshly computed set.
    ///
    /// New vectors overwrite in place before stale labels are dropped, so a
    /// label present in both sets is never missing to concurrent readers.
    pub fn replace(&self, centroids: HashMap<Label, Vec<f32>>) {
        let keep: HashSet<Label> = centroids.keys().cloned().collect();
        for (label, vector) in centroids {
            self.centroids.insert(label, vector);
        }
        self.centroids.retain(|label, _| keep.contains(label));
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Per-label mean of the training sentence vectors
pub fn compute_centroids(
    model: &dyn TextModel,
    examples: &[TrainingExample],
) -> Result<HashMap<Label, Vec<f32>>> {
    let mut sums: HashMap<Label, (Vec<f32>, usize)> = HashMap::new();

    for example in examples {
        let vector = model.sentence_vector(&example.text)?;
        let entry = sums
            .entry(example.label.clone())
            .or_insert_with(|| (vec![0.0; vector.len()], 0));
        for (acc, v) in entry.0.iter_mut().zip(&vector) {
            *acc += v;
        }
        entry.1 += 1;
    }

    Ok(sums
        .into_iter()
        .map(|(label, (sum, n))| {
            let mean = sum.into_iter().map(|x| x / n as f32).collect();
            (label, mean)
        })
        .collect())
}
