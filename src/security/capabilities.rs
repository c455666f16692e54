//! Linux capability dropping for the sandbox worker
//!
//! The worker never needs any capability: it reads its request from stdin,
//! touches files below the memory root with the invoking user's ordinary
//! permissions, and writes events to stdout. So it drops everything.
//!
//! ```text
//! ┌───────────────────┬─────────────────────────────────────────────┐
//! │  Effective (E)    │ cleared: nothing privileged works from now  │
//! │  Permitted (P)    │ cleared: nothing can be raised again        │
//! │  Inheritable (I)  │ cleared                                     │
//! │  Ambient (A)      │ cleared                                     │
//! │  Bounding (B)     │ cleared only when we hold CAP_SETPCAP       │
//! └───────────────────┴─────────────────────────────────────────────┘
//! ```

use std::io;

use caps::{CapSet, Capability};

// ═══════════════════════════════════════════════════════════════════════════
// CapabilityDropper
// ═══════════════════════════════════════════════════════════════════════════
// WHAT IT IS:
//   Removes every capability from the current process. An unprivileged
//   worker usually holds none, in which case this is a no-op; a worker
//   started by root loses root's powers before running a snippet.
//
// USAGE:
//   Call before installing the seccomp filter (capset stays allowed
//   by the filter, but there is nothing left to raise afterwards).
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct CapabilityDropper;

impl CapabilityDropper {
    pub fn new() -> Self {
        Self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // apply() - Drop everything
    // ═══════════════════════════════════════════════════════════════════════
    // ORDER:
    //   1. Bounding (while CAP_SETPCAP is still effective)
    //   2. Ambient, Inheritable
    //   3. Permitted, Effective
    //
    // This is IRREVERSIBLE.
    // ═══════════════════════════════════════════════════════════════════════
    pub fn apply(&self) -> Result<(), io::Error> {
        let can_setpcap = caps::has_cap(None, CapSet::Effective, Capability::CAP_SETPCAP).unwrap_or(false);
        if can_setpcap {
            for cap in caps::all() {
                caps::drop(None, CapSet::Bounding, cap).map_err(denied)?;
            }
        }

        for set in [CapSet::Ambient, CapSet::Inheritable, CapSet::Permitted, CapSet::Effective] {
            caps::clear(None, set).map_err(denied)?;
        }
        Ok(())
    }
}

fn denied(e: caps::errors::CapsError) -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, e.to_string())
}
