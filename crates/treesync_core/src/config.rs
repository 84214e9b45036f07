//! Directory configuration.

/// Configuration for opening a [`Directory`](crate::Directory).
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Whether to create an empty directory if no snapshot exists.
    pub create_if_missing: bool,

    /// Whether every non-empty commit writes a snapshot to the backing store.
    ///
    /// When disabled, state is only persisted by [`Directory::persist`](crate::Directory::persist).
    pub persist_on_commit: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            persist_on_commit: true,
        }
    }
}

impl DirectoryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether commits persist a snapshot.
    #[must_use]
    pub const fn persist_on_commit(mut self, value: bool) -> Self {
        self.persist_on_commit = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DirectoryConfig::default();
        assert!(config.create_if_missing);
        assert!(config.persist_on_commit);
    }

    #[test]
    fn builder_pattern() {
        let config = DirectoryConfig::new()
            .create_if_missing(false)
            .persist_on_commit(false);

        assert!(!config.create_if_missing);
        assert!(!config.persist_on_commit);
    }
}
