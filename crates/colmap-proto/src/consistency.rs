//! Consistency levels understood by the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Replication guarantee requested for a single read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    /// Write accepted once any node (including a hint) has it. Writes only.
    Any,
    /// One replica.
    One,
    /// Two replicas.
    Two,
    /// Three replicas.
    Three,
    /// Majority of replicas across all data centers.
    Quorum,
    /// Majority of replicas in the local data center.
    LocalQuorum,
    /// Majority of replicas in each data center.
    EachQuorum,
    /// Every replica.
    All,
    /// One replica in the local data center.
    LocalOne,
    /// Linearizable read/conditional write.
    Serial,
    /// Linearizable within the local data center.
    LocalSerial,
}

impl ConsistencyLevel {
    /// All levels, in declaration order.
    pub const ALL_LEVELS: [ConsistencyLevel; 11] = [
        ConsistencyLevel::Any,
        ConsistencyLevel::One,
        ConsistencyLevel::Two,
        ConsistencyLevel::Three,
        ConsistencyLevel::Quorum,
        ConsistencyLevel::LocalQuorum,
        ConsistencyLevel::EachQuorum,
        ConsistencyLevel::All,
        ConsistencyLevel::LocalOne,
        ConsistencyLevel::Serial,
        ConsistencyLevel::LocalSerial,
    ];

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyLevel::Any => "ANY",
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Two => "TWO",
            ConsistencyLevel::Three => "THREE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
            ConsistencyLevel::EachQuorum => "EACH_QUORUM",
            ConsistencyLevel::All => "ALL",
            ConsistencyLevel::LocalOne => "LOCAL_ONE",
            ConsistencyLevel::Serial => "SERIAL",
            ConsistencyLevel::LocalSerial => "LOCAL_SERIAL",
        }
    }

    /// Whether this level may be used for a read.
    ///
    /// `ANY` is a write-only level.
    pub fn is_valid_for_read(&self) -> bool {
        !matches!(self, ConsistencyLevel::Any)
    }

    /// Whether this is one of the serial (Paxos) levels.
    pub fn is_serial(&self) -> bool {
        matches!(self, ConsistencyLevel::Serial | ConsistencyLevel::LocalSerial)
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        ConsistencyLevel::ALL_LEVELS
            .iter()
            .copied()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| Error::InvalidConsistency(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("quorum".parse::<ConsistencyLevel>().unwrap(), ConsistencyLevel::Quorum);
        assert_eq!(
            "local-quorum".parse::<ConsistencyLevel>().unwrap(),
            ConsistencyLevel::LocalQuorum
        );
        assert_eq!("ONE".parse::<ConsistencyLevel>().unwrap(), ConsistencyLevel::One);
        assert!("sometimes".parse::<ConsistencyLevel>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        for level in ConsistencyLevel::ALL_LEVELS {
            assert_eq!(level.to_string().parse::<ConsistencyLevel>().unwrap(), level);
        }
    }

    #[test]
    fn test_read_validity() {
        assert!(!ConsistencyLevel::Any.is_valid_for_read());
        assert!(ConsistencyLevel::LocalOne.is_valid_for_read());
        assert!(ConsistencyLevel::LocalSerial.is_serial());
    }
}
