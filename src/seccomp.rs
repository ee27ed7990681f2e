//! The in-kernel classifier: syscalls with a handler trap to the tracer,
//! everything else runs at full speed without a stop.

use std::collections::BTreeMap;
use std::convert::TryInto;

use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};
use simple_error::try_with;

use crate::result::Result;

/// Syscalls diverted to the supervisor. Keep this in sync with
/// `syscalls::handler_for`: a traced syscall without a handler stops the
/// tracee for nothing.
pub const INTERCEPTED_SYSCALLS: &[libc::c_long] = &[
    libc::SYS_read,
    libc::SYS_write,
    libc::SYS_open,
    libc::SYS_openat,
    libc::SYS_close,
    libc::SYS_stat,
    libc::SYS_fstat,
    libc::SYS_lstat,
    libc::SYS_newfstatat,
    libc::SYS_getdents,
    libc::SYS_getdents64,
    libc::SYS_time,
    libc::SYS_gettimeofday,
    libc::SYS_clock_gettime,
    libc::SYS_getrandom,
    libc::SYS_unlink,
    libc::SYS_unlinkat,
    libc::SYS_rmdir,
    libc::SYS_utimensat,
];

/// Assemble the BPF program the child installs before exec: RET_TRACE for
/// the intercepted set, RET_ALLOW for the rest.
pub fn intercept_filter() -> Result<BpfProgram> {
    let rules: BTreeMap<i64, Vec<SeccompRule>> = INTERCEPTED_SYSCALLS
        .iter()
        .map(|nr| (*nr as i64, vec![]))
        .collect();
    let arch: TargetArch = try_with!(
        std::env::consts::ARCH.try_into(),
        "seccomp does not know architecture {}",
        std::env::consts::ARCH
    );
    let filter = try_with!(
        SeccompFilter::new(rules, SeccompAction::Allow, SeccompAction::Trace(0), arch),
        "cannot assemble seccomp filter"
    );
    Ok(try_with!(
        filter.try_into(),
        "cannot compile seccomp filter to BPF"
    ))
}
