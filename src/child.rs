//! Bootstrap of the traced child: declare ourselves a tracee, stop so the
//! supervisor can set its options, then load the seccomp filter and exec.

use std::ffi::{CStr, CString};

use log::error;
use nix::sys::ptrace;
use nix::sys::signal::{raise, Signal};
use nix::unistd::{execvp, fork, ForkResult, Pid};
use seccompiler::BpfProgram;
use simple_error::{bail, try_with, SimpleError};

use crate::result::Result;

/// Fork the command to trace. The parent gets the child's pid back while the
/// child parks itself in a SIGSTOP; the supervisor attaches to that stop.
pub fn spawn_traced(command: &[String], filter: BpfProgram) -> Result<Pid> {
    if command.is_empty() {
        bail!("no command to trace");
    }
    // Prepared before forking: the child must not allocate between fork and
    // exec while sibling threads may hold the allocator lock.
    let program = try_with!(
        CString::new(command[0].as_str()),
        "program name contains a NUL byte"
    );
    let args: Vec<CString> = command
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| SimpleError::with("argument contains a NUL byte", e))?;

    match try_with!(unsafe { fork() }, "cannot fork the tracee") {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            if let Err(err) = bootstrap(&program, &args, &filter) {
                error!("tracee bootstrap failed: {}", err);
            }
            std::process::exit(127);
        }
    }
}

fn bootstrap(program: &CStr, args: &[CString], filter: &BpfProgram) -> Result<()> {
    try_with!(ptrace::traceme(), "cannot enable tracing on myself");
    // Parked here until the supervisor has set its tracing options.
    try_with!(raise(Signal::SIGSTOP), "cannot stop for the tracer");

    // The filter must be live before exec so the new program's very first
    // syscalls already trap. no_new_privs lets an unprivileged process load
    // it.
    let res = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if res != 0 {
        bail!("cannot set no_new_privs: {}", std::io::Error::last_os_error());
    }
    try_with!(
        seccompiler::apply_filter(filter),
        "cannot install seccomp filter"
    );

    match execvp(program, args) {
        Ok(void) => match void {},
        Err(err) => bail!("cannot exec {:?}: {}", program, err),
    }
}
