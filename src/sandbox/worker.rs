//! Worker side of the sandbox
//!
//! This is what the `recall-sandbox` binary runs: read one
//! [`WorkerRequest`] from stdin, confine the process, interpret the snippet
//! against a [`ToolApi`] bound to the memory root, and stream
//! [`WorkerEvent`]s to stdout.

use std::io::{self, Read, Write};

use super::output::LimitedBuffer;
use super::policy::CapabilityPolicy;
use super::protocol::{WorkerEvent, WorkerRequest, SCHEMA_VERSION};
use super::{ExecutionFault, SandboxError};
use crate::script::{parse_program, Fault, Interpreter, OutputSink};
use crate::tools::{MemoryRoot, ToolApi};

/// Forwards each `print` as a `stdout` event, up to the output cap.
struct EventSink<'w, W: Write> {
    out: &'w mut W,
    budget: LimitedBuffer,
    error: Option<io::Error>,
}

impl<W: Write> EventSink<'_, W> {
    fn emit(&mut self, event: &WorkerEvent) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = write_event(self.out, event) {
            self.error = Some(e);
        }
    }
}

impl<W: Write> OutputSink for EventSink<'_, W> {
    fn write(&mut self, text: &str) {
        if self.budget.was_truncated() {
            return;
        }
        let before = self.budget.as_str().len();
        self.budget.push(text);
        let forwarded = self.budget.as_str()[before..].to_string();
        if !forwarded.is_empty() {
            self.emit(&WorkerEvent::Stdout { text: forwarded });
        }
    }
}

fn write_event<W: Write>(out: &mut W, event: &WorkerEvent) -> io::Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    out.write_all(b"\n")?;
    out.flush()
}

fn finished(
    value: Option<super::SafeValue>,
    error: Option<ExecutionFault>,
    diagnostics: Option<String>,
) -> WorkerEvent {
    WorkerEvent::Finished {
        schema_version: SCHEMA_VERSION,
        value,
        error,
        diagnostics,
    }
}

/// Serve one request over the given streams.
///
/// `confine` runs after the request has been read and the memory root
/// opened, and before any snippet code is interpreted. The only `Err` is a
/// failure to write to `output`.
pub fn serve<R, W, C>(mut input: R, mut output: W, confine: C) -> io::Result<()>
where
    R: Read,
    W: Write,
    C: FnOnce(&WorkerRequest) -> io::Result<()>,
{
    let mut raw = String::new();
    let request = match input.read_to_string(&mut raw) {
        Ok(_) => serde_json::from_str::<WorkerRequest>(&raw).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    let request = match request {
        Ok(request) => request,
        Err(detail) => {
            let error = SandboxError::Protocol {
                detail: format!("bad request: {}", detail),
            };
            return write_event(&mut output, &finished(None, Some(error.into()), None));
        }
    };

    let root = match MemoryRoot::open(&request.memory_root) {
        Ok(root) => root,
        Err(e) => return write_event(&mut output, &finished(None, Some(e.into()), None)),
    };

    if let Err(e) = confine(&request) {
        let error = SandboxError::Crashed {
            detail: format!("sandbox setup failed: {}", e),
        };
        return write_event(&mut output, &finished(None, Some(error.into()), None));
    }

    let tools = ToolApi::new(root, request.limits);
    let event = execute(&request, &tools, &mut output);
    write_event(&mut output, &event)
}

/// Interpret the snippet, streaming `print` output to `output`, and return
/// the `finished` event.
pub fn execute<W: Write>(request: &WorkerRequest, tools: &ToolApi, output: &mut W) -> WorkerEvent {
    let program = match parse_program(&request.code) {
        Ok(program) => program,
        Err(e) => return finished(None, None, Some(e.to_string())),
    };

    let policy = CapabilityPolicy::new(request.denied_capabilities.iter().copied());
    if let Err(denial) = policy.scan(&program) {
        let error = SandboxError::CapabilityDenied {
            capability: denial.capability,
            identifier: denial.identifier,
        };
        return finished(None, Some(error.into()), None);
    }

    let mut sink = EventSink {
        out: output,
        budget: LimitedBuffer::new(request.max_output_bytes as usize),
        error: None,
    };

    let (outcome, value) = {
        let mut interp = Interpreter::new(tools, &policy, &mut sink);
        let outcome = interp.run(&program);
        let value = interp.global(&request.result_variable).map(|v| v.to_safe());
        (outcome, value)
    };

    match outcome {
        Ok(()) => match value.transpose() {
            Ok(value) => finished(value, None, None),
            Err(detail) => {
                let error = SandboxError::Unserializable {
                    detail: format!("'{}': {}", request.result_variable, detail),
                };
                finished(None, Some(error.into()), None)
            }
        },
        Err(Fault::Script(e)) => finished(None, None, Some(e.to_string())),
        Err(Fault::Tool(e)) => finished(None, Some(e.into()), None),
        Err(Fault::Denied { capability, identifier }) => {
            let error = SandboxError::CapabilityDenied { capability, identifier };
            finished(None, Some(error.into()), None)
        }
    }
}
