//! Entry storage: the key-value layer and the partitions built on it.

pub mod kvstore;
pub mod partition;

pub use kvstore::{BatchOp, KvPair, KvStore, MemoryKvStore};
pub use partition::{MemoryPartition, Partition, SearchScope};
