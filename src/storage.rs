//! Key-value persistence for demo-mode history. Values are JSON-serialized lists stored
//! under fixed keys; there are no transactional guarantees across keys or processes.
use crate::{
    Error,
    Result,
};
use serde::{
    Serialize,
    de::DeserializeOwned,
};
use sled::{
    Config,
    Tree,
};
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc,
        Mutex,
    },
};

const TREE_NAME: &str = "case_rush";

pub trait KeyValueStore {
    /// retrieve the raw bytes stored under `key`
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// write or overwrite the raw bytes stored under `key`
    fn set_raw(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Read the JSON list stored under `key`; a missing key reads as an empty list.
    fn load_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_list<T: Serialize>(&mut self, key: &str, items: &[T]) -> Result<()> {
        let bytes = serde_json::to_vec(items)?;
        self.set_raw(key, bytes)
    }

    /// Read-modify-write append to the end of the list under `key`.
    fn append<T: Serialize + DeserializeOwned>(&mut self, key: &str, item: T) -> Result<()> {
        let mut items: Vec<T> = self.load_list(key)?;
        items.push(item);
        self.save_list(key, &items)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    values: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = self
            .values
            .lock()
            .map_err(|_| Error::Storage("in-memory store lock poisoned".into()))?;
        Ok(guard.get(key).cloned())
    }

    fn set_raw(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| Error::Storage("in-memory store lock poisoned".into()))?;
        guard.insert(key.to_string(), value);
        Ok(())
    }
}

/// Sled-backed store, flushed after every write.
#[derive(Clone)]
pub struct SledStore {
    tree: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Config::default().path(path).open()?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { tree })
    }

    pub fn temporary() -> Result<Self> {
        let db = Config::new().temporary(true).open()?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { tree })
    }
}

impl KeyValueStore for SledStore {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|bytes| bytes.to_vec()))
    }

    fn set_raw(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.tree.insert(key.as_bytes(), value)?;
        self.tree.flush()?;
        Ok(())
    }
}
