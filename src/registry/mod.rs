//! Channel subscription registry
//!
//! A chained hash table keyed by channel name whose values are the ordered
//! subscriber lists of each channel.
//!
//! ```text
//!   buckets[fnv1a(name) % n]
//!     │
//!     ├─► "temp"  ─► [node 0x741 @ conn 3, node 0x742 @ conn 5]
//!     └─► "light" ─► [node 0x741 @ conn 3]
//! ```

pub mod entry;
pub mod error;
pub mod store;
pub mod table;

pub use entry::{ChannelEntry, RemoveOutcome, SubscribeOutcome, Subscriber};
pub use error::RegistryError;
pub use store::{ChannelRegistry, DEFAULT_BUCKET_COUNT};
pub use table::{exact_match, fnv1a, ChainedTable, CompareFn, HashFn};
