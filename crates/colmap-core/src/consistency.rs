//! Consistency level resolution.
//!
//! The effective level of a read or write is chosen, highest priority
//! first, from:
//!
//! 1. the level passed explicitly with the call;
//! 2. the level fixed by an open batch session;
//! 3. the default declared for the entity type;
//! 4. the global default.
//!
//! An explicit level that differs from the one a batch session fixed is
//! rejected instead of silently picking one of them.

use std::collections::HashMap;

use colmap_proto::ConsistencyLevel;

use crate::error::{ConfigError, Result, StateError};

/// Whether a level is resolved for a read or a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// A read/write level pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPair {
    /// Level for reads.
    pub read: ConsistencyLevel,
    /// Level for writes.
    pub write: ConsistencyLevel,
}

impl LevelPair {
    /// Create a level pair.
    pub fn new(read: ConsistencyLevel, write: ConsistencyLevel) -> Self {
        Self { read, write }
    }

    /// The level for `kind`.
    pub fn get(&self, kind: OperationKind) -> ConsistencyLevel {
        match kind {
            OperationKind::Read => self.read,
            OperationKind::Write => self.write,
        }
    }
}

/// Per-entity-type override. Unset halves fall back to the global default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelOverride {
    /// Read level override.
    pub read: Option<ConsistencyLevel>,
    /// Write level override.
    pub write: Option<ConsistencyLevel>,
}

impl LevelOverride {
    fn get(&self, kind: OperationKind) -> Option<ConsistencyLevel> {
        match kind {
            OperationKind::Read => self.read,
            OperationKind::Write => self.write,
        }
    }
}

/// Levels fixed by an open batch session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionLevels {
    /// Fixed read level.
    pub read: Option<ConsistencyLevel>,
    /// Fixed write level.
    pub write: Option<ConsistencyLevel>,
}

impl SessionLevels {
    /// No fixed levels.
    pub fn none() -> Self {
        Self::default()
    }

    /// Fix both levels.
    pub fn fixed(read: Option<ConsistencyLevel>, write: Option<ConsistencyLevel>) -> Self {
        Self { read, write }
    }

    /// The fixed level for `kind`, if any.
    pub fn get(&self, kind: OperationKind) -> Option<ConsistencyLevel> {
        match kind {
            OperationKind::Read => self.read,
            OperationKind::Write => self.write,
        }
    }
}

/// Default levels per entity type plus one global default.
#[derive(Debug, Clone)]
pub struct ConsistencyPolicy {
    defaults: LevelPair,
    per_type: HashMap<String, LevelOverride>,
}

impl Default for ConsistencyPolicy {
    fn default() -> Self {
        Self::new(ConsistencyLevel::One, ConsistencyLevel::One)
    }
}

impl ConsistencyPolicy {
    /// Create a policy with the given global defaults.
    pub fn new(read: ConsistencyLevel, write: ConsistencyLevel) -> Self {
        Self {
            defaults: LevelPair::new(read, write),
            per_type: HashMap::new(),
        }
    }

    /// Override the read level of an entity type.
    pub fn with_read(mut self, entity_type: impl Into<String>, level: ConsistencyLevel) -> Self {
        self.per_type.entry(entity_type.into()).or_default().read = Some(level);
        self
    }

    /// Override the write level of an entity type.
    pub fn with_write(mut self, entity_type: impl Into<String>, level: ConsistencyLevel) -> Self {
        self.per_type.entry(entity_type.into()).or_default().write = Some(level);
        self
    }

    /// Global defaults.
    pub fn defaults(&self) -> LevelPair {
        self.defaults
    }

    /// Default pair for an entity type, ignoring explicit and session levels.
    pub fn defaults_for(&self, entity_type: &str) -> LevelPair {
        let over = self.per_type.get(entity_type).copied().unwrap_or_default();
        LevelPair::new(
            over.read.unwrap_or(self.defaults.read),
            over.write.unwrap_or(self.defaults.write),
        )
    }

    /// Resolve the effective level of one operation.
    pub fn resolve(
        &self,
        entity_type: &str,
        kind: OperationKind,
        explicit: Option<ConsistencyLevel>,
        session: SessionLevels,
    ) -> Result<ConsistencyLevel> {
        let level = match (explicit, session.get(kind)) {
            (Some(requested), Some(fixed)) if requested != fixed => {
                return Err(StateError::ConsistencyConflict {
                    entity_type: entity_type.to_string(),
                    requested,
                    fixed,
                }
                .into());
            }
            (Some(level), _) | (None, Some(level)) => level,
            (None, None) => self
                .per_type
                .get(entity_type)
                .and_then(|over| over.get(kind))
                .unwrap_or_else(|| self.defaults.get(kind)),
        };

        if kind == OperationKind::Read && !level.is_valid_for_read() {
            return Err(ConfigError::InvalidReadConsistency(level).into());
        }
        Ok(level)
    }
}
