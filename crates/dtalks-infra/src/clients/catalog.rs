//! File-backed FAQ catalogue and document authorization
//!
//! Both are loaded once into memory and can be reloaded in place.

use async_trait::async_trait;
use dtalks_core::{DocumentAccess, FaqAnswer, FaqCatalog, FaqCategory, FaqQuestion};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

use crate::Result;

fn active_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    categories: Vec<CategoryRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryRecord {
    category_id: i64,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "active_default")]
    is_active: bool,
    #[serde(default)]
    faqs: Vec<FaqRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct FaqRecord {
    faq_id: i64,
    question: String,
    answer: String,
    #[serde(default = "active_default")]
    is_active: bool,
}

/// FAQ catalogue read from a JSON file of categories with nested entries.
///
/// Inactive categories and entries are invisible to every lookup.
pub struct JsonFaqCatalog {
    path: PathBuf,
    catalog: RwLock<CatalogFile>,
}

impl JsonFaqCatalog {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let catalog = Self::read(&path).await?;
        info!(
            path = %path.display(),
            categories = catalog.categories.len(),
            "Loaded FAQ catalogue"
        );
        Ok(Self {
            path,
            catalog: RwLock::new(catalog),
        })
    }

    async fn read(path: &Path) -> Result<CatalogFile> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn reload(&self) -> Result<()> {
        let fresh = Self::read(&self.path).await?;
        *self.catalog.write().await = fresh;
        Ok(())
    }
}

#[async_trait]
impl FaqCatalog for JsonFaqCatalog {
    async fn categories(&self) -> dtalks_core::Result<Vec<FaqCategory>> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .categories
            .iter()
            .filter(|c| c.is_active)
            .map(|c| FaqCategory {
                category_id: c.category_id,
                name: c.name.clone(),
                description: c.description.clone(),
            })
            .collect())
    }

    async fn questions(&self, category_id: i64) -> dtalks_core::Result<Vec<FaqQuestion>> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .categories
            .iter()
            .filter(|c| c.is_active && c.category_id == category_id)
            .flat_map(|c| c.faqs.iter())
            .filter(|f| f.is_active)
            .map(|f| FaqQuestion {
                faq_id: f.faq_id,
                question: f.question.clone(),
            })
            .collect())
    }

    async fn answer(&self, faq_id: i64) -> dtalks_core::Result<Option<FaqAnswer>> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .categories
            .iter()
            .filter(|c| c.is_active)
            .flat_map(|c| c.faqs.iter())
            .find(|f| f.is_active && f.faq_id == faq_id)
            .map(|f| FaqAnswer {
                question: f.question.clone(),
                answer: f.answer.clone(),
            }))
    }
}

/// User to file-name grants read from a JSON object.
///
/// Files listed under `"*"` are visible to everyone.
pub struct JsonDocumentAccess {
    path: PathBuf,
    grants: RwLock<HashMap<String, Vec<String>>>,
}

impl JsonDocumentAccess {
    pub const SHARED_KEY: &'static str = "*";

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let grants = Self::read(&path).await?;
        info!(path = %path.display(), users = grants.len(), "Loaded document grants");
        Ok(Self {
            path,
            grants: RwLock::new(grants),
        })
    }

    pub fn from_grants(grants: HashMap<String, Vec<String>>) -> Self {
        Self {
            path: PathBuf::new(),
            grants: RwLock::new(grants),
        }
    }

    async fn read(path: &Path) -> Result<HashMap<String, Vec<String>>> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn reload(&self) -> Result<()> {
        let fresh = Self::read(&self.path).await?;
        *self.grants.write().await = fresh;
        Ok(())
    }
}

#[async_trait]
impl DocumentAccess for JsonDocumentAccess {
    async fn authorized_files(&self, user_id: &str) -> dtalks_core::Result<Vec<String>> {
        let grants = self.grants.read().await;
        let mut files: Vec<String> = grants
            .get(Self::SHARED_KEY)
            .into_iter()
            .chain(grants.get(user_id))
            .flatten()
            .cloned()
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }
}
