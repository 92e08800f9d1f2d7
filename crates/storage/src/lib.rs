pub mod memory;
pub mod posix;
pub use memory::MemoryBackend;
pub use posix::PosixBackend;

/// A simple synchronous object store holding whole files under string keys.
pub trait StorageBackend {
    /// Write `data` under key (relative path) `key`, replacing what was there.
    fn put(&self, key: &str, data: &[u8]) -> std::io::Result<()>;
    /// Read the entire object at `key`.
    fn get(&self, key: &str) -> std::io::Result<Vec<u8>>;
    /// Delete the object at `key`.
    fn delete(&self, key: &str) -> std::io::Result<()>;
    /// List the names (objects only) directly under `prefix`.
    fn list(&self, prefix: &str) -> std::io::Result<Vec<String>>;
    /// Whether an object exists at `key`.
    fn exists(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }
    /// Human-readable location of `key`, e.g. a filesystem path.
    fn location(&self, key: &str) -> String;
}
