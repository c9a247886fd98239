pub mod cached;
pub mod config;
pub mod error;
pub mod ext;
pub mod redb;
pub mod remote;
pub mod table;
pub mod traits;

pub use cached::{CachedKV, KVCache, new_cache};
pub use config::{Backend, StoreConfig, open_store};
pub use error::KVError;
pub use ext::{KVStoreExt, set_json};
pub use crate::redb::RedbStore;
pub use remote::TableStore;
pub use table::{ContinuationToken, Item, MemoryTable, ScanPage, ScanRequest, TableClient};
pub use traits::{KVStore, Record};
