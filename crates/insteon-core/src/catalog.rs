//! Device catalog - Maps category/sub-category pairs to names and SKUs
//!
//! A device answers an ID request with its category and sub-category bytes.
//! The catalog turns those into something readable. A default table is
//! compiled in; a JSON file with the same layout can replace it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const BUILTIN: &str = include_str!("../data/catalog.json");

/// Placeholder for any name the catalog cannot resolve
pub const UNKNOWN: &str = "unknown";

/// Category that on/off outlets report under the switch category
const OUTLET_CATEGORY: &str = "FE";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse catalog: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// A device category (first byte of the identity)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A device model, keyed by `cat:subcat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub sku: String,
    /// Product key, for devices identified by key rather than sub-category
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    categories: BTreeMap<String, CategoryInfo>,
    #[serde(default)]
    models: BTreeMap<String, ModelInfo>,
}

impl Catalog {
    /// The compiled-in table
    pub fn builtin() -> Self {
        match Self::from_json(BUILTIN) {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!(error = %e, "Built-in catalog is invalid");
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_json::from_str(content)?;
        Ok(catalog.normalized())
    }

    /// Upper-case every key so lookups can ignore case
    fn normalized(self) -> Self {
        Self {
            categories: self
                .categories
                .into_iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v))
                .collect(),
            models: self
                .models
                .into_iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v))
                .collect(),
        }
    }

    /// Category for a device, with outlets split out of the switch category
    pub fn lookup_category(&self, cat: &str, subcat: &str) -> Option<&CategoryInfo> {
        let cat = cat.to_ascii_uppercase();
        let subcat = subcat.to_ascii_uppercase();
        if cat == "02" && matches!(subcat.as_str(), "08" | "39") {
            if let Some(outlet) = self.categories.get(OUTLET_CATEGORY) {
                return Some(outlet);
            }
        }
        self.categories.get(&cat)
    }

    /// Model by `cat:subcat`, falling back to a product key match
    pub fn lookup_model(&self, cat: &str, subcat: &str, key: Option<&str>) -> Option<&ModelInfo> {
        let exact = format!("{}:{}", cat, subcat).to_ascii_uppercase();
        self.models.get(&exact).or_else(|| {
            let key = key?;
            self.models
                .values()
                .find(|m| m.key.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(key)))
        })
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_loads() {
        let catalog = Catalog::builtin();
        assert!(!catalog.is_empty());

        let dimmer = catalog.lookup_category("01", "20").unwrap();
        assert_eq!(dimmer.kind, "dimmer");
        let model = catalog.lookup_model("01", "20", None).unwrap();
        assert_eq!(model.sku, "2477D");
    }

    #[test]
    fn test_outlets_resolve_to_outlet_category() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.lookup_category("02", "39").unwrap().kind, "outlet");
        assert_eq!(catalog.lookup_category("02", "08").unwrap().kind, "outlet");
        assert_eq!(catalog.lookup_category("02", "2a").unwrap().kind, "switch");
    }

    #[test]
    fn test_model_key_fallback() {
        let json = r#"{
            "categories": { "10": { "name": "Security", "type": "security" } },
            "models": {
                "10:01": { "name": "Motion Sensor", "sku": "2842-222" },
                "10:02": { "name": "TriggerLinc", "sku": "2421", "key": "00003a" }
            }
        }"#;
        let catalog = Catalog::from_json(json).unwrap();

        assert_eq!(catalog.lookup_model("10", "01", None).unwrap().name, "Motion Sensor");
        assert_eq!(
            catalog.lookup_model("10", "7F", Some("00003A")).unwrap().name,
            "TriggerLinc"
        );
        assert!(catalog.lookup_model("10", "7F", None).is_none());
        assert!(catalog.lookup_category("99", "00").is_none());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"{ "models": { "01:2e": { "name": "FanLinc", "sku": "2475F" } } }"#)
            .unwrap();

        let catalog = Catalog::from_file(&path).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup_model("01", "2E", None).unwrap().sku, "2475F");
        assert!(Catalog::from_file(&dir.path().join("missing.json")).is_err());
    }
}
