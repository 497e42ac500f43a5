//! Log configuration.

/// Configuration for opening the write-ahead log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to create the log directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Maximum size of a single log file before rotation.
    ///
    /// Rotation happens between records; a single oversized record may
    /// push a file past this limit rather than be split.
    pub max_file_size: u64,

    /// Initial capacity of record buffers.
    pub buffer_capacity: usize,

    /// Whether `flush` syncs to durable media (fsync) or only pushes to
    /// the OS. Disabling trades crash durability for speed; tests and
    /// benchmarks only.
    pub sync_on_commit: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_file_size: 64 * 1024 * 1024, // 64 MiB
            buffer_capacity: 64 * 1024,      // 64 KiB
            sync_on_commit: true,
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the log directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the maximum log file size before rotation.
    #[must_use]
    pub const fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Sets the initial record buffer capacity.
    #[must_use]
    pub const fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Sets whether `flush` syncs to durable media.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LogConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.max_file_size, 64 * 1024 * 1024);
    }

    #[test]
    fn builder_pattern() {
        let config = LogConfig::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .max_file_size(1024);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.max_file_size, 1024);
    }
}
