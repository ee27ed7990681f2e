#![deny(clippy::print_stdout, clippy::print_stderr, clippy::unwrap_used)]

//! Deterministic execution sandbox. Runs a command as a traced process tree
//! and rewrites what it can observe (inodes, mtimes, time, randomness,
//! scheduling-dependent short I/O) so repeated runs behave identically.

use simple_error::{bail, try_with};

pub mod child;
pub mod cpu;
pub mod dirents;
pub mod global_state;
pub mod mapper;
pub mod result;
pub mod seccomp;
pub mod state;
pub mod syscalls;
pub mod tracer;

pub use crate::global_state::EventCounters;
use crate::result::Result;
use crate::tracer::Supervisor;

pub struct TraceOptions {
    /// Program and arguments to run under the tracer.
    pub command: Vec<String>,
}

pub struct TraceOutcome {
    /// The root tracee's exit status; 128+signal if a signal killed it.
    pub exit_status: i32,
    pub counters: EventCounters,
}

/// Trace one command to completion.
pub fn trace_command(opts: &TraceOptions) -> Result<TraceOutcome> {
    if opts.command.is_empty() {
        bail!("no command to trace");
    }
    let filter = try_with!(seccomp::intercept_filter(), "cannot prepare syscall interception");
    let root = child::spawn_traced(&opts.command, filter)?;
    let mut supervisor = try_with!(Supervisor::attach(root), "cannot attach to {}", root);
    let exit_status = supervisor.run()?;
    Ok(TraceOutcome {
        exit_status,
        counters: supervisor.counters(),
    })
}
