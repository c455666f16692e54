//! Process confinement for the sandbox worker
//!
//! The worker applies three layers to itself after reading its request and
//! before interpreting any snippet code:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 1: RLIMITS                                               │
//! │  CPU seconds, address space, file size, no core dumps           │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 2: CAPABILITIES                                          │
//! │  Drop every capability the process holds                        │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 3: SECCOMP BPF                                           │
//! │  exec, fork, sockets, ptrace, mount ... fail with EPERM         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod capabilities;
pub mod rlimits;
pub mod seccomp;

pub use capabilities::CapabilityDropper;
pub use rlimits::WorkerLimits;
pub use seccomp::WorkerSeccomp;

use std::io;

/// Apply all three layers, in order, to the current process.
pub fn confine(limits: WorkerLimits) -> Result<(), io::Error> {
    limits.apply()?;
    CapabilityDropper::new().apply()?;
    WorkerSeccomp::with_worker_defaults().apply()?;
    Ok(())
}
