//! Tracing subscriber setup for the `recall` binary
//!
//! Spans emitted by the agent:
//!
//! ```text
//! agent_task{trace_id, model}
//!   ├── llm_call{turn}
//!   └── code_execution{code_len}
//! ```
//!
//! The sandbox worker never installs a subscriber: its stdout is the
//! protocol channel.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,recall=debug";

/// Initialize logging to stderr, human-readable or JSON.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Environment filter for log levels
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
    }

    tracing::debug!(json, "tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
