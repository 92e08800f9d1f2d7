//
//
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};
use crate::StorageBackend;

pub struct PosixBackend {
    root: PathBuf,
}

impl PosixBackend {
    /// Store everything under `root` on the local filesystem.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    /// Backend rooted at the parent of `path`, plus the key naming `path`.
    pub fn for_file<P: AsRef<Path>>(path: P) -> io::Result<(Self, String)> {
        let path = path.as_ref();
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("{:?} names no file", path)))?;
        let root = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((Self { root }, key.to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl StorageBackend for PosixBackend {
    fn put(&self, key: &str, data: &[u8]) -> io::Result<()> {
        let path = self.path_for(key);
        if let Some(p) = path.parent() {
            fs::create_dir_all(p)?;
        }
        fs::write(path, data)
    }

    fn get(&self, key: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(key))
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        fs::remove_file(self.path_for(key))
    }

    fn list(&self, prefix: &str) -> io::Result<Vec<String>> {
        let dir = self.root.join(prefix);
        let mut names = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                let f = entry?;
                if f.path().is_file() {
                    if let Some(n) = f.file_name().to_str() {
                        names.push(n.to_string());
                    }
                }
            }
        }
        Ok(names)
    }

    fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    fn location(&self, key: &str) -> String {
        self.path_for(key).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_file_splits_directory_and_name() {
        let (backend, key) = PosixBackend::for_file("/tmp/strides.asdf").unwrap();
        assert_eq!(backend.root(), Path::new("/tmp"));
        assert_eq!(key, "strides.asdf");
        assert_eq!(backend.location(&key), "/tmp/strides.asdf");

        let (backend, key) = PosixBackend::for_file("strides.asdf").unwrap();
        assert_eq!(backend.root(), Path::new("."));
        assert_eq!(key, "strides.asdf");

        assert!(PosixBackend::for_file("/").is_err());
    }
}
