//! Lease-guarded materialization of mutable views over append-only
//! per-flow event logs.
//!
//! A [`ViewRepository`] hands out exactly one live view per flow at a
//! time, enforced by a lease taken in a shared store. Views are rebuilt
//! from a cache-aside fast path or by deterministic replay of the flow's
//! events through a per-view-type [`EventDispatch`] table; tagged view
//! operations record themselves back through the repository, which
//! refreshes the cache and appends to the authoritative log.

mod cache;
pub use cache::{Cache, SetFlags};
mod config;
pub use config::RepositoryConfig;
mod dispatch;
pub use dispatch::{EventDispatch, EventDispatchBuilder};
mod error;
pub use error::{Error, Result};
mod event;
pub use event::{Event, generate_flow_id};
mod lock;
pub use lock::DistributedLock;
mod log;
pub use log::{EventLog, LogFeatures};
mod memory;
pub use memory::{MemoryCache, MemoryEventLog};
mod repository;
pub use repository::{RepositoryHandle, ViewRepository, ViewRepositoryBuilder};
mod serializer;
pub use serializer::{ArgTuple, JsonSerializer, Serializer, decode_args, encode_args};
mod view;
pub use view::{FlowView, ViewCore};
