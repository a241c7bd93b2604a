pub mod fetch;
pub mod policy;
pub mod store;

use thiserror::Error;

/// Cache generation shipped with this build. Bumping it makes `activate`
/// delete every cache the previous generation owned.
pub const CACHE_VERSION: &str = "v3";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("network error: {0}")]
    Network(String),
}

/// The two named caches a generation owns: a shell tier populated up
/// front and a runtime tier filled as requests flow through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    shell: String,
    runtime: String,
}

impl CacheNames {
    pub fn for_version(version: &str) -> Self {
        Self {
            shell: version.to_string(),
            runtime: format!("{version}-runtime"),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// Whether `name` belongs to this generation.
    pub fn is_current(&self, name: &str) -> bool {
        name == self.shell || name == self.runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_from_version() {
        let names = CacheNames::for_version("v3");
        assert_eq!(names.shell(), "v3");
        assert_eq!(names.runtime(), "v3-runtime");
    }

    #[test]
    fn stale_generations_are_not_current() {
        let names = CacheNames::for_version("v3");
        assert!(names.is_current("v3"));
        assert!(names.is_current("v3-runtime"));
        assert!(!names.is_current("v2"));
        assert!(!names.is_current("v2-runtime"));
    }
}
