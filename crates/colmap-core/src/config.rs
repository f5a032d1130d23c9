//! Engine configuration.

use colmap_proto::ConsistencyLevel;

/// Default read consistency level.
pub const DEFAULT_READ_CONSISTENCY: ConsistencyLevel = ConsistencyLevel::One;

/// Default write consistency level.
pub const DEFAULT_WRITE_CONSISTENCY: ConsistencyLevel = ConsistencyLevel::One;

/// Default maximum depth of a cascaded operation.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 100;

/// Mapping engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Global default read level.
    pub default_read_consistency: ConsistencyLevel,

    /// Global default write level.
    pub default_write_consistency: ConsistencyLevel,

    /// Create missing tables at bootstrap instead of failing.
    pub create_missing_tables: bool,

    /// Verify that non-cascaded joined entities exist before writing the owner.
    pub ensure_join_exists: bool,

    /// Maximum nesting of a cascaded operation.
    pub max_cascade_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_read_consistency: DEFAULT_READ_CONSISTENCY,
            default_write_consistency: DEFAULT_WRITE_CONSISTENCY,
            create_missing_tables: false,
            ensure_join_exists: false,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global default read level.
    pub fn with_read_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.default_read_consistency = level;
        self
    }

    /// Set the global default write level.
    pub fn with_write_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.default_write_consistency = level;
        self
    }

    /// Create missing tables at bootstrap.
    pub fn with_create_missing_tables(mut self, create: bool) -> Self {
        self.create_missing_tables = create;
        self
    }

    /// Verify non-cascaded join targets before writing.
    pub fn with_ensure_join_exists(mut self, ensure: bool) -> Self {
        self.ensure_join_exists = ensure;
        self
    }

    /// Set the maximum cascade depth.
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }
}
