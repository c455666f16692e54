//! Per-process resource limits for the sandbox worker
//!
//! The host enforces the wall-clock timeout by killing the worker. These
//! limits cover what the host cannot see from outside: CPU time burned
//! between event lines, and memory growth.

use std::io;

use nix::sys::resource::{setrlimit, Resource};

/// Largest file the worker may write, independent of the Tool API limits.
const MAX_FILE_BYTES: u64 = 128 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerLimits {
    /// RLIMIT_CPU in seconds; 0 leaves it unset
    pub cpu_seconds: u64,
    /// RLIMIT_AS in bytes; 0 leaves it unset
    pub memory_bytes: u64,
}

impl WorkerLimits {
    pub fn new(cpu_seconds: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_seconds,
            memory_bytes,
        }
    }

    /// Install the limits on the current process.
    ///
    /// Soft and hard limits are set to the same value so the snippet
    /// cannot raise them back.
    pub fn apply(&self) -> Result<(), io::Error> {
        if self.cpu_seconds > 0 {
            set(Resource::RLIMIT_CPU, self.cpu_seconds)?;
        }
        if self.memory_bytes > 0 {
            set(Resource::RLIMIT_AS, self.memory_bytes)?;
        }
        set(Resource::RLIMIT_FSIZE, MAX_FILE_BYTES)?;
        set(Resource::RLIMIT_CORE, 0)?;
        Ok(())
    }
}

fn set(resource: Resource, limit: u64) -> Result<(), io::Error> {
    setrlimit(resource, limit as libc::rlim_t, limit as libc::rlim_t)
        .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, format!("{:?}: {}", resource, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_means_unset() {
        let limits = WorkerLimits::new(0, 0);
        assert_eq!(limits.cpu_seconds, 0);
        assert_eq!(limits, WorkerLimits { cpu_seconds: 0, memory_bytes: 0 });
    }
}
