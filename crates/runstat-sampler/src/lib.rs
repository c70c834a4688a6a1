//! runstat-sampler — periodic sampling of runtime statistics.
//!
//! A [`Sampler`] reads process counters through a [`RuntimeProbe`] and
//! writes them as gauges into the shared registry. The
//! [`SamplerSupervisor`] runs each sampler as its own background task on a
//! fixed interval.
//!
//! # Architecture
//!
//! ```text
//! SamplerSupervisor
//!   └── Per-sampler background task (tokio interval, missed ticks skipped)
//!         └── Sampler::sample() on the blocking pool
//!               ├── ProfilerScope (cleared on every exit path)
//!               ├── RuntimeProbe::snapshot() → SampleSnapshot
//!               └── gauges + duration histogram → MetricRegistry
//! ```
//!
//! # Failure isolation
//!
//! Each read of a tick is independent: an unsupported or failing read is
//! logged and skipped while the others still publish. A panicking tick is
//! caught by the supervisor and the next tick runs on schedule. After
//! `max_consecutive_failures` failed ticks the sampler stops itself.

pub mod alloc;
pub mod error;
pub mod objects;
pub mod probe;
pub mod process;
pub mod sampler;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use alloc::{AllocatorStats, CountingAllocator};
pub use error::{SampleReadError, SamplerError};
pub use objects::{ObjectToken, ObjectTracker, Tracked};
pub use probe::{GcStats, ProfilerScope, RuntimeProbe, SampleSnapshot};
pub use process::ProcessProbe;
pub use sampler::{Sampler, SamplerState, TickReport};
pub use supervisor::SamplerSupervisor;
