use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, RwLock};

use crate::StorageBackend;

/// In-process backend; clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> io::Error {
    io::Error::new(io::ErrorKind::Other, "memory backend lock poisoned")
}

fn not_found(key: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no object at '{}'", key))
}

impl StorageBackend for MemoryBackend {
    fn put(&self, key: &str, data: &[u8]) -> io::Result<()> {
        self.objects
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> io::Result<Vec<u8>> {
        self.objects
            .read()
            .map_err(poisoned)?
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.objects
            .write()
            .map_err(poisoned)?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| not_found(key))
    }

    fn list(&self, prefix: &str) -> io::Result<Vec<String>> {
        let dir = match prefix.trim_end_matches('/') {
            "" => String::new(),
            p => format!("{}/", p),
        };
        let objects = self.objects.read().map_err(poisoned)?;
        Ok(objects
            .keys()
            .filter_map(|k| k.strip_prefix(&dir))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn location(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}
