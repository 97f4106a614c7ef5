//! # Dtalks NLP
//!
//! Intent classification for the Dtalks chatbot.
//!
//! - **Keyword rules**: bilingual overrides that always win
//! - **Text model**: trainable classifier with sentence vectors
//! - **Centroids**: per-label mean vectors adjusted by user feedback
//!
//! ```rust,no_run
//! use dtalks_core::ClassifierConfig;
//! use dtalks_nlp::HybridIntentClassifier;
//!
//! let classifier = HybridIntentClassifier::from_config(&ClassifierConfig::default())?;
//! let result = classifier.classify("개발팀 조직도 보여줘", 1);
//! println!("{} ({:.2})", result.label, result.confidence);
//! # Ok::<(), dtalks_nlp::NlpError>(())
//! ```

pub mod centroid;
pub mod classifier;
pub mod error;
pub mod model;
pub mod preprocess;
pub mod rules;

pub use centroid::{compute_centroids, CentroidStore};
pub use classifier::{adjust_confidence, HybridIntentClassifier, TrainingReport};
pub use error::{NlpError, Result};
pub use model::{parse_training_data, NaiveBayesModel, TextModel, TrainingExample, DEFAULT_VECTOR_DIM};
pub use preprocess::preprocess_text;
pub use rules::{KeywordRule, KeywordRules};
