// ABOUTME: Capability-based filesystem sandbox for the fs built-ins

use crate::config::FsConfig;
use cap_std::fs::Dir;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("access denied: `{0}` is outside the sandbox")]
    PathNotAllowed(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file too large: `{0}` exceeds {1} bytes")]
    TooLarge(String, usize),

    #[error("i/o error: {0}")]
    Io(String),
}

/// Filesystem access restricted to a set of capability directories. Scripts
/// address files relative to the allowed roots; the first root containing
/// the path wins.
pub struct Sandbox {
    roots: Vec<Dir>,
    max_file_size: usize,
}

impl Sandbox {
    pub fn new(config: &FsConfig) -> Result<Self, SandboxError> {
        let mut roots = Vec::with_capacity(config.allowed_paths.len());
        for path in &config.allowed_paths {
            std::fs::create_dir_all(path)
                .map_err(|e| SandboxError::Io(format!("cannot create {}: {}", path.display(), e)))?;
            let dir = Dir::open_ambient_dir(path, cap_std::ambient_authority())
                .map_err(|e| SandboxError::Io(format!("cannot open {}: {}", path.display(), e)))?;
            roots.push(dir);
        }
        Ok(Sandbox {
            roots,
            max_file_size: config.max_file_size,
        })
    }

    /// Absolute paths and `..` traversal never leave the roots; cap-std
    /// enforces this again below us.
    fn check_path(&self, path: &str) -> Result<(), SandboxError> {
        if path.starts_with('/') || path.starts_with('\\') || path.contains("..") {
            return Err(SandboxError::PathNotAllowed(path.to_string()));
        }
        Ok(())
    }

    fn find_root(&self, path: &str) -> Option<&Dir> {
        self.roots.iter().find(|root| root.metadata(path).is_ok())
    }

    pub fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.check_path(path)?;
        let root = self
            .find_root(path)
            .ok_or_else(|| SandboxError::NotFound(path.to_string()))?;
        let size = root
            .metadata(path)
            .map_err(|e| SandboxError::Io(e.to_string()))?
            .len();
        if size as usize > self.max_file_size {
            return Err(SandboxError::TooLarge(path.to_string(), self.max_file_size));
        }
        root.read_to_string(path)
            .map_err(|e| SandboxError::Io(format!("{}: {}", path, e)))
    }

    /// Writes go to the first root.
    pub fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        self.check_path(path)?;
        if contents.len() > self.max_file_size {
            return Err(SandboxError::TooLarge(path.to_string(), self.max_file_size));
        }
        let root = self
            .roots
            .first()
            .ok_or_else(|| SandboxError::PathNotAllowed(path.to_string()))?;
        root.write(path, contents)
            .map_err(|e| SandboxError::Io(format!("{}: {}", path, e)))
    }

    pub fn exists(&self, path: &str) -> Result<bool, SandboxError> {
        self.check_path(path)?;
        Ok(self.find_root(path).is_some())
    }

    pub fn list_files(&self, path: &str) -> Result<Vec<String>, SandboxError> {
        self.check_path(path)?;
        let root = self
            .find_root(if path.is_empty() { "." } else { path })
            .ok_or_else(|| SandboxError::NotFound(path.to_string()))?;
        let entries = root
            .read_dir(if path.is_empty() { "." } else { path })
            .map_err(|e| SandboxError::Io(format!("{}: {}", path, e)))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SandboxError::Io(e.to_string()))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_sandbox(tag: &str) -> (Sandbox, PathBuf) {
        let dir = std::env::temp_dir().join(format!("lea-sandbox-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = FsConfig {
            allowed_paths: vec![dir.clone()],
            max_file_size: 1024,
        };
        (Sandbox::new(&config).unwrap(), dir)
    }

    #[test]
    fn test_write_then_read() {
        let (sandbox, dir) = temp_sandbox("rw");
        sandbox.write_file("note.txt", "hello").unwrap();
        assert_eq!(sandbox.read_file("note.txt").unwrap(), "hello");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_escape_attempts_are_denied() {
        let (sandbox, dir) = temp_sandbox("escape");
        assert!(matches!(
            sandbox.read_file("../secret"),
            Err(SandboxError::PathNotAllowed(_))
        ));
        assert!(matches!(
            sandbox.read_file("/etc/passwd"),
            Err(SandboxError::PathNotAllowed(_))
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_file() {
        let (sandbox, dir) = temp_sandbox("missing");
        assert!(matches!(
            sandbox.read_file("nope.txt"),
            Err(SandboxError::NotFound(_))
        ));
        assert!(!sandbox.exists("nope.txt").unwrap());
        std::fs::remove_dir_all(dir).ok();
    }
}
