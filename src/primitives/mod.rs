//! Shared primitives: a spinlock, a seqlock, a wait-group, and a spin-based
//! barrier, none of which depend on the hazard engine.

mod barrier;
mod seqlock;
mod spinlock;
mod wait_group;

pub use barrier::{Barrier, BarrierWaitResult};
pub use seqlock::Seqlock;
pub use spinlock::{Spinlock, SpinlockGuard};
pub use wait_group::WaitGroup;
