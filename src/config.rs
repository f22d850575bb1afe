//! Configuration options for readers and writers.

use crate::types::AttemptId;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Liveness callback for long-running merges.
pub trait ProgressReporter: Send + Sync {
    /// Called periodically with the number of events consumed so far.
    fn progress(&self, events_read: u64);
}

/// A reporter that only remembers the latest count.
#[derive(Debug, Default)]
pub struct CountingReporter {
    events_read: AtomicU64,
    calls: AtomicU64,
}

impl CountingReporter {
    /// Creates a new reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest count reported.
    pub fn events_read(&self) -> u64 {
        self.events_read.load(Ordering::Relaxed)
    }

    /// Number of callbacks received.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ProgressReporter for CountingReporter {
    fn progress(&self, events_read: u64) {
        self.events_read.store(events_read, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Options for opening readers.
#[derive(Clone)]
pub struct ReaderOptions {
    /// Environment-specific settings passed through to the storage layer.
    /// Default: empty
    pub source_configuration: HashMap<String, String>,

    /// Optional liveness callback.
    /// Default: None
    pub progress_reporter: Option<Arc<dyn ProgressReporter>>,

    /// Number of events consumed between progress callbacks.
    /// Default: 10000
    pub report_interval: u64,

    /// Verify record checksums while reading bucket files.
    /// Default: true
    pub verify_checksums: bool,

    /// Attempt to read from directories holding a bucket written by more
    /// than one attempt, keyed by directory path.
    /// Default: empty
    pub delta_attempts: HashMap<PathBuf, AttemptId>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            source_configuration: HashMap::new(),
            progress_reporter: None,
            report_interval: 10_000,
            verify_checksums: true,
            delta_attempts: HashMap::new(),
        }
    }
}

impl fmt::Debug for ReaderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderOptions")
            .field("source_configuration", &self.source_configuration)
            .field("progress_reporter", &self.progress_reporter.is_some())
            .field("report_interval", &self.report_interval)
            .field("verify_checksums", &self.verify_checksums)
            .field("delta_attempts", &self.delta_attempts)
            .finish()
    }
}

impl ReaderOptions {
    /// Creates a new ReaderOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one source configuration entry.
    pub fn source_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source_configuration.insert(key.into(), value.into());
        self
    }

    /// Sets the progress reporter.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Sets the number of events between progress callbacks.
    pub fn report_interval(mut self, interval: u64) -> Self {
        self.report_interval = interval;
        self
    }

    /// Enables or disables checksum verification.
    pub fn verify_checksums(mut self, value: bool) -> Self {
        self.verify_checksums = value;
        self
    }

    /// Reads `attempt` from `dir` when it holds several attempts of a bucket.
    pub fn attempt(mut self, dir: impl Into<PathBuf>, attempt: AttemptId) -> Self {
        self.delta_attempts.insert(dir.into(), attempt);
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.report_interval == 0 {
            return Err(crate::Error::invalid_argument("report_interval must be > 0"));
        }
        Ok(())
    }
}

/// Options for publishing base and delta directories.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Sync bucket files before the publishing rename.
    /// Default: true
    pub sync_on_publish: bool,

    /// Write a `_metadata_acid` sidecar into published directories.
    /// Default: true
    pub write_metadata_file: bool,

    /// Persist the binary delta descriptor (`_delta_descriptor`) inside
    /// published deltas.
    /// Default: false
    pub write_descriptor_file: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self { sync_on_publish: true, write_metadata_file: true, write_descriptor_file: false }
    }
}

impl WriterOptions {
    /// Creates a new WriterOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync before publishing.
    pub fn sync_on_publish(mut self, value: bool) -> Self {
        self.sync_on_publish = value;
        self
    }

    /// Sets whether to write the metadata sidecar.
    pub fn write_metadata_file(mut self, value: bool) -> Self {
        self.write_metadata_file = value;
        self
    }

    /// Sets whether deltas carry their encoded descriptor.
    pub fn write_descriptor_file(mut self, value: bool) -> Self {
        self.write_descriptor_file = value;
        self
    }
}
