use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::{CheckEntry, Product, MAX_HISTORY_ENTRIES};
use crate::Result;

const PRODUCTS_FILE: &str = "known_products.json";
const CONFIG_FILE: &str = "config.json";
const HISTORY_FILE: &str = "check_history.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreConfig {
    #[serde(default)]
    chat_ids: Vec<String>,
}

/// Durable record of previously observed products, the subscriber list and
/// the bounded check history. Three independent JSON documents in one data
/// directory; snapshot writes replace the file atomically.
pub struct ProductStore {
    products_path: PathBuf,
    config_path: PathBuf,
    history_path: PathBuf,
}

impl ProductStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;

        Ok(Self {
            products_path: data_dir.join(PRODUCTS_FILE),
            config_path: data_dir.join(CONFIG_FILE),
            history_path: data_dir.join(HISTORY_FILE),
        })
    }

    // --- Products ---

    /// True iff no snapshot has ever been persisted.
    pub fn is_first_run(&self) -> bool {
        !self.products_path.exists()
    }

    /// Load the persisted snapshot. A missing file is an empty snapshot;
    /// a corrupt one is an error, not a reset to baseline.
    pub fn load_products(&self) -> Result<HashMap<String, Product>> {
        if !self.products_path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.products_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Subset of `current` whose ids are absent from the persisted
    /// snapshot. Pure set subtraction against the last committed state.
    pub fn find_new(&self, current: &HashMap<String, Product>) -> Result<HashMap<String, Product>> {
        let known = self.load_products()?;
        Ok(current
            .iter()
            .filter(|(id, _)| !known.contains_key(*id))
            .map(|(id, product)| (id.clone(), product.clone()))
            .collect())
    }

    /// Merge `current` into the snapshot and persist it. All fields are
    /// overwritten for known ids except `first_seen`, which keeps the value
    /// stamped when the id first appeared. Returns the newly seen subset.
    pub fn update_products(&self, current: &HashMap<String, Product>) -> Result<HashMap<String, Product>> {
        let mut known = self.load_products()?;
        let now = Utc::now();
        let mut new_products = HashMap::new();

        for (id, product) in current {
            match known.get_mut(id) {
                Some(existing) => {
                    let first_seen = existing.first_seen;
                    *existing = product.clone();
                    existing.first_seen = first_seen;
                }
                None => {
                    let mut fresh = product.clone();
                    fresh.first_seen = Some(now);
                    known.insert(id.clone(), fresh.clone());
                    new_products.insert(id.clone(), fresh);
                }
            }
        }

        self.save_products(&known)?;
        debug!("Saved {} products to storage", known.len());
        Ok(new_products)
    }

    fn save_products(&self, products: &HashMap<String, Product>) -> Result<()> {
        let contents = serde_json::to_string_pretty(products)?;
        write_atomic(&self.products_path, &contents)
    }

    // --- Subscribers ---

    pub fn chat_ids(&self) -> Vec<String> {
        self.load_config().chat_ids
    }

    /// Persist the subscriber list, deduplicated and in stable order.
    pub fn save_chat_ids(&self, chat_ids: &[String]) -> Result<()> {
        let deduped: BTreeSet<&String> = chat_ids.iter().collect();
        let config = StoreConfig {
            chat_ids: deduped.into_iter().cloned().collect(),
        };
        let contents = serde_json::to_string_pretty(&config)?;
        write_atomic(&self.config_path, &contents)
    }

    pub fn add_chat_id(&self, chat_id: &str) -> Result<()> {
        let mut chat_ids = self.chat_ids();
        if !chat_ids.iter().any(|id| id == chat_id) {
            chat_ids.push(chat_id.to_string());
            self.save_chat_ids(&chat_ids)?;
            info!("Added chat ID: {chat_id}");
        }
        Ok(())
    }

    fn load_config(&self) -> StoreConfig {
        if !self.config_path.exists() {
            return StoreConfig::default();
        }
        match fs::read_to_string(&self.config_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable config file: {e}");
                StoreConfig::default()
            }),
            Err(e) => {
                warn!("Ignoring unreadable config file: {e}");
                StoreConfig::default()
            }
        }
    }

    // --- History ---

    /// Append a check record, keeping only the newest entries.
    pub fn log_check(&self, total: usize, new_count: usize, new_ids: Option<Vec<String>>) -> Result<()> {
        let mut history = self.load_history();
        history.push(CheckEntry::new(total, new_count, new_ids));

        if history.len() > MAX_HISTORY_ENTRIES {
            let excess = history.len() - MAX_HISTORY_ENTRIES;
            history.drain(..excess);
        }

        let contents = serde_json::to_string_pretty(&history)?;
        write_atomic(&self.history_path, &contents)
    }

    pub fn last_check(&self) -> Option<CheckEntry> {
        self.load_history().pop()
    }

    fn load_history(&self) -> Vec<CheckEntry> {
        if !self.history_path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&self.history_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable history file: {e}");
                Vec::new()
            }),
            Err(e) => {
                warn!("Ignoring unreadable history file: {e}");
                Vec::new()
            }
        }
    }
}

/// Write the full document to a sibling temp file, then rename it into
/// place so readers never observe a partial snapshot.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, ProductStore) {
        let dir = TempDir::new().unwrap();
        let store = ProductStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn product(id: &str, name: &str) -> Product {
        Product::new(id, name, format!("https://example.com/product?product_no={id}"))
    }

    fn snapshot(ids: &[&str]) -> HashMap<String, Product> {
        ids.iter()
            .map(|id| ((*id).to_string(), product(id, &format!("Product {id}"))))
            .collect()
    }

    #[test]
    fn test_first_run_until_snapshot_persisted() {
        let (_dir, store) = test_store();
        assert!(store.is_first_run());

        store.update_products(&snapshot(&["1"])).unwrap();
        assert!(!store.is_first_run());
    }

    #[test]
    fn test_find_new_against_empty_snapshot_returns_all() {
        let (_dir, store) = test_store();
        let current = snapshot(&["1", "2", "3"]);

        let new = store.find_new(&current).unwrap();
        assert_eq!(new.len(), 3);
    }

    #[test]
    fn test_update_stamps_first_seen_on_new_ids_only() {
        let (_dir, store) = test_store();

        let new = store.update_products(&snapshot(&["1", "2"])).unwrap();
        assert_eq!(new.len(), 2);
        assert!(new.values().all(|p| p.first_seen.is_some()));

        let known = store.load_products().unwrap();
        assert!(known.values().all(|p| p.first_seen.is_some()));
    }

    #[test]
    fn test_update_is_idempotent() {
        let (_dir, store) = test_store();
        let current = snapshot(&["1", "2", "3"]);

        assert_eq!(store.update_products(&current).unwrap().len(), 3);
        assert_eq!(store.update_products(&current).unwrap().len(), 0);
        assert_eq!(store.load_products().unwrap().len(), 3);
    }

    #[test]
    fn test_update_preserves_first_seen_across_field_changes() {
        let (_dir, store) = test_store();
        store.update_products(&snapshot(&["1"])).unwrap();
        let original = store.load_products().unwrap()["1"].first_seen;
        assert!(original.is_some());

        let mut changed = snapshot(&["1"]);
        changed.get_mut("1").unwrap().price = "12,000원".to_string();
        let new = store.update_products(&changed).unwrap();

        assert!(new.is_empty());
        let reloaded = store.load_products().unwrap();
        assert_eq!(reloaded["1"].price, "12,000원");
        assert_eq!(reloaded["1"].first_seen, original);
    }

    #[test]
    fn test_find_new_diffs_against_persisted_snapshot() {
        let (_dir, store) = test_store();
        store.update_products(&snapshot(&["1", "2"])).unwrap();

        let current = snapshot(&["1", "2", "3", "4"]);
        let new = store.find_new(&current).unwrap();

        let mut ids: Vec<&str> = new.keys().map(String::as_str).collect();
        ids.sort();
        assert_eq!(ids, vec!["3", "4"]);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error_not_a_reset() {
        let (dir, store) = test_store();
        fs::write(dir.path().join(PRODUCTS_FILE), "{not json").unwrap();

        assert!(store.load_products().is_err());
        // The file exists, so this is still not a first run.
        assert!(!store.is_first_run());
    }

    #[test]
    fn test_history_bounded_to_100_entries_oldest_evicted() {
        let (_dir, store) = test_store();

        for i in 0..150 {
            store.log_check(i, 0, None).unwrap();
        }

        let history = store.load_history();
        assert_eq!(history.len(), MAX_HISTORY_ENTRIES);
        // The 50 oldest entries (totals 0..49) are gone, in order.
        assert_eq!(history.first().unwrap().total_products, 50);
        assert_eq!(history.last().unwrap().total_products, 149);
    }

    #[test]
    fn test_last_check_returns_most_recent_entry() {
        let (_dir, store) = test_store();
        assert!(store.last_check().is_none());

        store.log_check(10, 0, None).unwrap();
        store.log_check(12, 2, Some(vec!["8".into(), "9".into()])).unwrap();

        let last = store.last_check().unwrap();
        assert_eq!(last.total_products, 12);
        assert_eq!(last.new_count, 2);
    }

    #[test]
    fn test_chat_ids_deduplicated_on_save() {
        let (_dir, store) = test_store();
        assert!(store.chat_ids().is_empty());

        store
            .save_chat_ids(&["111".into(), "222".into(), "111".into()])
            .unwrap();
        assert_eq!(store.chat_ids(), vec!["111".to_string(), "222".to_string()]);
    }

    #[test]
    fn test_add_chat_id_ignores_duplicates() {
        let (_dir, store) = test_store();
        store.add_chat_id("111").unwrap();
        store.add_chat_id("111").unwrap();
        store.add_chat_id("222").unwrap();

        assert_eq!(store.chat_ids(), vec!["111".to_string(), "222".to_string()]);
    }
}
