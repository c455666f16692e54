//! Sandbox worker: runs one snippet per process.
//!
//! Spawned by the host executor with a JSON request on stdin. Confines
//! itself (rlimits, capabilities, seccomp) before interpreting anything,
//! then streams JSON-line events on stdout. Diagnostics go to stderr, which
//! the host keeps for crash reports.

use std::io;
use std::process::ExitCode;

use recall::sandbox::worker;
use recall::security::{self, WorkerLimits};

fn main() -> ExitCode {
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();

    let served = worker::serve(stdin, stdout, |request| {
        security::confine(WorkerLimits::new(request.cpu_seconds, request.memory_limit_bytes))
    });

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("recall-sandbox: failed to write events: {}", e);
            ExitCode::FAILURE
        }
    }
}
