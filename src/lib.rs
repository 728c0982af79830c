#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod fence;
mod loom;

pub mod asp;
mod counter;
pub mod deque;
pub mod hashmap;
pub mod hazard;
pub mod primitives;
pub mod queue;

pub use asp::{AtomicSharedPtr, Shared, UpgradeError, Weak};
pub use deque::{Stealer, StealError, Worker};
pub use hashmap::{ConcurrentHashMap, InsertError, SizingError};
pub use hazard::Domain;
pub use primitives::{Barrier, BarrierWaitResult, Seqlock, Spinlock, SpinlockGuard, WaitGroup};
pub use queue::{Mpmc, QueueMode, Sentinel, SentinelQueue, Spsc, StateQueue, TryPopError, TryPushError};
