pub mod error;
pub mod codec;
pub mod block;
pub mod manifest;
pub mod chain;
pub mod compositor;
pub mod store;
pub mod restore;

pub use error::{RestoreError, Result};
pub use codec::{CodecId, get_codec};
pub use block::{Block, BlockLocator, IndexedLocator, ShardedLocator};
pub use manifest::Backup;
pub use chain::VolumeBackupChain;
pub use compositor::{Composite, CompositeStats, Compositor};
pub use store::BackupStore;
pub use restore::{LocatorKind, RestoreOptions, RestoreReport};
