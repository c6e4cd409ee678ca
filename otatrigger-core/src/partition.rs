//! Update target selection.

use derive_more::{Display, Error};
use std::fmt;

/// Descriptor of the inactive firmware slot an update is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTarget {
    pub label: String,
    /// Flash offset of the partition
    pub address: u32,
    /// Partition size in bytes
    pub size: u32,
}

impl fmt::Display for PartitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' @ 0x{:08x} ({} bytes)",
            self.label, self.address, self.size
        )
    }
}

/// Failure while listing partitions for diagnostics.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[display("partition table could not be read")]
    TableUnavailable,
}

/// Platform query for the next writable firmware slot.
pub trait PartitionSelector {
    /// The next inactive firmware partition, or `None` when the partition
    /// table has no usable update slot.
    fn select_target(&self) -> Option<PartitionTarget>;

    /// All application partitions the platform knows about. Used only for
    /// logging when [`select_target`](Self::select_target) comes back empty.
    fn known_partitions(&self) -> Result<Vec<PartitionTarget>, PartitionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_descriptor() {
        let target = PartitionTarget {
            label: "ota_1".to_string(),
            address: 0x0020_0000,
            size: 0x0018_0000,
        };
        assert_eq!(target.to_string(), "'ota_1' @ 0x00200000 (1572864 bytes)");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            PartitionError::TableUnavailable.to_string(),
            "partition table could not be read"
        );
    }
}
