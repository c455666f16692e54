//! Seccomp BPF filter for the sandbox worker
//!
//! # What is Seccomp?
//!
//! Seccomp (Secure Computing) is a Linux kernel feature that restricts
//! which system calls a process can make. The worker interprets untrusted
//! snippets; even if the interpreter had a bug, the process it runs in
//! cannot start programs, open sockets or trace other processes.
//!
//! # Denylist, not allowlist
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  ┌──────────┐     ┌─────────────┐     ┌──────────────┐        │
//! │  │ Syscall  │────►│ BPF Program │────►│ in denylist? │        │
//! │  └──────────┘     └─────────────┘     └──────┬───────┘        │
//! │                                         yes  │  no            │
//! │                                   EPERM ◄────┴────► ALLOW      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Denied calls fail with `EPERM` instead of killing the process, so the
//! worker can still report what happened over its protocol channel.

use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};
use std::convert::TryInto;
use std::io;

// ═══════════════════════════════════════════════════════════════════════════
// WorkerSeccomp
// ═══════════════════════════════════════════════════════════════════════════
// WHAT IT IS:
//   A builder for the filter installed in the worker right before it runs
//   a snippet. Everything listed here returns EPERM; everything else is
//   allowed, since the worker itself only reads, writes and allocates.
//
// WHAT IT BLOCKS:
//   - execve / fork / clone (spawning anything)
//   - socket / connect / bind (network)
//   - ptrace, mount, chroot, setuid, kernel modules, namespaces
// ═══════════════════════════════════════════════════════════════════════════

pub struct WorkerSeccomp {
    /// Syscall numbers that fail with EPERM
    denied_syscalls: Vec<i64>,
}

impl WorkerSeccomp {
    /// An empty filter; call [`deny`](Self::deny) to add syscalls.
    pub fn new() -> Self {
        Self {
            denied_syscalls: Vec::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // with_worker_defaults() - Pre-configured for the sandbox worker
    // ═══════════════════════════════════════════════════════════════════════
    // SYSCALL CATEGORIES DENIED:
    //   1. Process creation: execve, execveat, fork, vfork, clone, clone3
    //   2. Network: socket, connect, bind, listen, accept, accept4
    //   3. Debugging: ptrace
    //   4. Filesystem namespace: mount, umount2, chroot, pivot_root
    //   5. Identity: setuid, setgid
    //   6. Kernel: init_module, delete_module
    //   7. Namespaces: unshare, setns
    // ═══════════════════════════════════════════════════════════════════════
    pub fn with_worker_defaults() -> Self {
        let mut filter = Self::new();
        for (_, syscall) in Self::blocked_syscalls() {
            filter.deny(syscall);
        }
        filter
    }

    pub fn deny(&mut self, syscall: i64) -> &mut Self {
        if !self.denied_syscalls.contains(&syscall) {
            self.denied_syscalls.push(syscall);
        }
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // build() - Compile the filter into BPF bytecode
    // ═══════════════════════════════════════════════════════════════════════
    // ```text
    // ┌─────────────────────────────────────────────────────────┐
    // │  SeccompFilter                                          │
    // │    mismatch_action: Allow                               │
    // │    match_action: Errno(EPERM)                           │
    // │    rules:                                               │
    // │      execve → [] (empty = always matches)               │
    // │      socket → []                                        │
    // │      (anything else) → Allow                            │
    // └─────────────────────────────────────────────────────────┘
    // ```
    // ═══════════════════════════════════════════════════════════════════════
    pub fn build(&self) -> Result<BpfProgram, io::Error> {
        let rules: Vec<(i64, Vec<SeccompRule>)> = self
            .denied_syscalls
            .iter()
            .map(|&syscall| (syscall, vec![]))
            .collect();

        let arch: TargetArch = std::env::consts::ARCH
            .try_into()
            .map_err(|e: seccompiler::BackendError| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let filter = SeccompFilter::new(
            rules.into_iter().collect(),
            SeccompAction::Allow,
            SeccompAction::Errno(libc::EPERM as u32),
            arch,
        )
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let bpf_prog: BpfProgram = filter
            .try_into()
            .map_err(|e: seccompiler::BackendError| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        Ok(bpf_prog)
    }

    /// Install the filter on the current process.
    ///
    /// Irreversible, and inherited by anything the process would spawn.
    pub fn apply(&self) -> Result<(), io::Error> {
        let bpf_prog = self.build()?;
        seccompiler::apply_filter(&bpf_prog)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(())
    }

    pub fn denied_count(&self) -> usize {
        self.denied_syscalls.len()
    }

    /// The default denylist, by name, for logging and tests.
    pub fn blocked_syscalls() -> Vec<(&'static str, i64)> {
        let mut blocked = vec![
            ("execve", libc::SYS_execve),
            ("execveat", libc::SYS_execveat),
            ("clone", libc::SYS_clone),
            ("clone3", libc::SYS_clone3),
            ("socket", libc::SYS_socket),
            ("connect", libc::SYS_connect),
            ("bind", libc::SYS_bind),
            ("listen", libc::SYS_listen),
            ("accept", libc::SYS_accept),
            ("accept4", libc::SYS_accept4),
            ("ptrace", libc::SYS_ptrace),
            ("mount", libc::SYS_mount),
            ("umount2", libc::SYS_umount2),
            ("chroot", libc::SYS_chroot),
            ("pivot_root", libc::SYS_pivot_root),
            ("setuid", libc::SYS_setuid),
            ("setgid", libc::SYS_setgid),
            ("init_module", libc::SYS_init_module),
            ("delete_module", libc::SYS_delete_module),
            ("unshare", libc::SYS_unshare),
            ("setns", libc::SYS_setns),
        ];
        // aarch64 has no fork/vfork syscalls; glibc goes through clone there.
        #[cfg(target_arch = "x86_64")]
        blocked.extend([("fork", libc::SYS_fork), ("vfork", libc::SYS_vfork)]);
        blocked
    }
}

impl Default for WorkerSeccomp {
    fn default() -> Self {
        Self::with_worker_defaults()
    }
}
