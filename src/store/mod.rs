//! Nested key/value store.
//!
//! The persistence collaborator the runtime talks to: a store is a named
//! bag of sections, each either a string map or a collection of child
//! stores, and the whole tree can be written to or read from a directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("section {0} has a different kind")]
    WrongKind(String),
    #[error("missing entry: {0}")]
    Missing(String),
}

enum Section {
    KeyValue(BTreeMap<String, String>),
    Stores(BTreeMap<String, Store>),
}

impl Section {
    fn kind(&self) -> &'static str {
        match self {
            Section::KeyValue(_) => "keyvalue",
            Section::Stores(_) => "stores",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Manifest {
    sections: BTreeMap<String, String>,
}

struct StoreInner {
    name: String,
    sections: Mutex<BTreeMap<String, Section>>,
}

#[derive(Clone)]
pub struct Store(Arc<StoreInner>);

impl Store {
    pub fn new(name: &str) -> Store {
        Store(Arc::new(StoreInner {
            name: name.to_string(),
            sections: Mutex::new(BTreeMap::new()),
        }))
    }

    pub fn name(&self) -> String {
        self.0.name.clone()
    }

    pub fn kv_set(&self, section: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut sections = self.0.sections.lock().expect("store lock poisoned");
        let entry = sections
            .entry(section.to_string())
            .or_insert_with(|| Section::KeyValue(BTreeMap::new()));
        match entry {
            Section::KeyValue(map) => {
                map.insert(key.to_string(), value.to_string());
                Ok(())
            }
            other => Err(StoreError::WrongKind(format!("{}: {}", section, other.kind()))),
        }
    }

    pub fn kv_get(&self, section: &str, key: &str) -> Option<String> {
        let sections = self.0.sections.lock().expect("store lock poisoned");
        match sections.get(section) {
            Some(Section::KeyValue(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    pub fn kv_keys(&self, section: &str) -> Vec<String> {
        let sections = self.0.sections.lock().expect("store lock poisoned");
        match sections.get(section) {
            Some(Section::KeyValue(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn child_put(&self, section: &str, child: Store) -> Result<(), StoreError> {
        let mut sections = self.0.sections.lock().expect("store lock poisoned");
        let entry = sections
            .entry(section.to_string())
            .or_insert_with(|| Section::Stores(BTreeMap::new()));
        match entry {
            Section::Stores(map) => {
                map.insert(child.name(), child);
                Ok(())
            }
            other => Err(StoreError::WrongKind(format!("{}: {}", section, other.kind()))),
        }
    }

    pub fn child_get(&self, section: &str, name: &str) -> Option<Store> {
        let sections = self.0.sections.lock().expect("store lock poisoned");
        match sections.get(section) {
            Some(Section::Stores(map)) => map.get(name).cloned(),
            _ => None,
        }
    }

    pub fn children(&self, section: &str) -> Vec<Store> {
        let sections = self.0.sections.lock().expect("store lock poisoned");
        match sections.get(section) {
            Some(Section::Stores(map)) => map.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Write the store tree below `dir` (a `<dir>/<name>` subtree).
    pub fn write(&self, dir: &Path) -> Result<(), StoreError> {
        let root = dir.join(&self.0.name);
        fs::create_dir_all(&root)?;

        let sections = self.0.sections.lock().expect("store lock poisoned");
        let manifest = Manifest {
            sections: sections
                .iter()
                .map(|(name, section)| (name.clone(), section.kind().to_string()))
                .collect(),
        };
        fs::write(
            root.join("_store.json"),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        for (name, section) in sections.iter() {
            match section {
                Section::KeyValue(map) => {
                    fs::write(
                        root.join(format!("{}.json", name)),
                        serde_json::to_vec_pretty(map)?,
                    )?;
                }
                Section::Stores(map) => {
                    let sub = root.join(name);
                    fs::create_dir_all(&sub)?;
                    let names: Vec<String> = map.keys().cloned().collect();
                    fs::write(sub.join("_stores.json"), serde_json::to_vec_pretty(&names)?)?;
                    for child in map.values() {
                        child.write(&sub)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Read a store tree previously written below `dir`.
    pub fn read(dir: &Path, name: &str) -> Result<Store, StoreError> {
        let root = dir.join(name);
        let manifest: Manifest =
            serde_json::from_slice(&fs::read(root.join("_store.json"))?)?;

        let store = Store::new(name);
        let mut sections = store.0.sections.lock().expect("store lock poisoned");
        for (section, kind) in manifest.sections {
            match kind.as_str() {
                "keyvalue" => {
                    let map: BTreeMap<String, String> =
                        serde_json::from_slice(&fs::read(root.join(format!("{}.json", section)))?)?;
                    sections.insert(section, Section::KeyValue(map));
                }
                "stores" => {
                    let sub = root.join(&section);
                    let names: Vec<String> =
                        serde_json::from_slice(&fs::read(sub.join("_stores.json"))?)?;
                    let mut map = BTreeMap::new();
                    for child_name in names {
                        let child = Store::read(&sub, &child_name)?;
                        map.insert(child_name, child);
                    }
                    sections.insert(section, Section::Stores(map));
                }
                other => return Err(StoreError::WrongKind(other.to_string())),
            }
        }
        drop(sections);
        Ok(store)
    }
}
