//! Engine, partition, and read configuration

/// Configuration for an [`Engine`](crate::Engine) instance
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Shared cache budget in bytes, for engines that page.
    ///
    /// The in-memory engine keeps every record resident and records the
    /// value only as a sizing hint.
    pub cache_size: Option<u64>,
}

impl EngineConfig {
    /// Set the shared cache budget
    pub fn with_cache_size(mut self, bytes: u64) -> Self {
        self.cache_size = Some(bytes);
        self
    }
}

/// Configuration for a primary partition, fixed at open
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionConfig {
    /// Whether the partition tolerates duplicate primary keys.
    ///
    /// Retained for engines that support duplicate primaries; this engine
    /// stores one value per key and a repeated put overwrites.
    pub sorted_duplicates: bool,
}

/// Configuration for a secondary partition, fixed at open
#[derive(Debug, Clone, Copy)]
pub struct SecondaryConfig {
    /// Whether a derived key may change across updates of one record.
    ///
    /// `true` (the default) promises the projection is stable for the
    /// record's lifetime; the engine re-derives on every update either way,
    /// so the flag is a contract statement rather than a fast path here.
    pub immutable_key: bool,

    /// Whether several records may share one derived key (default true).
    /// When false the index enforces uniqueness at commit.
    pub allow_duplicates: bool,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            immutable_key: true,
            allow_duplicates: true,
        }
    }
}

/// Isolation/locking strength for reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Lock-consistent reads: shared record locks held to transaction end
    #[default]
    Default,

    /// Read the latest committed value without taking a lock
    ReadCommitted,

    /// Relaxed read for monitoring and debugging; never takes a lock.
    ///
    /// With buffered write sets no dirty data is observable, so this
    /// behaves like [`LockMode::ReadCommitted`] in this engine.
    ReadUncommitted,
}

impl LockMode {
    /// Whether reads under this mode take shared record locks
    pub(crate) fn locks_reads(self) -> bool {
        matches!(self, LockMode::Default)
    }
}
