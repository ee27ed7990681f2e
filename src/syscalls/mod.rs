//! Syscall handlers. One handler instance is armed on the per-tracee state at
//! the entry stop and receives the matching exit stop, however many events
//! from other tracees arrive in between.

use crate::global_state::GlobalState;
use crate::state::State;
use crate::tracer::ptrace::Tracee;

pub mod file;
pub mod io;
pub mod random;
pub mod time;

use crate::dirents::DirentLayout;

/// What the supervisor should do after a post-hook.
#[derive(Debug, PartialEq, Eq)]
pub enum PostOutcome {
    /// Accept the result and disarm the handler.
    Done,
    /// Rewind and re-execute from the pre-retry register baseline; the
    /// handler stays armed and its pre-hook runs again.
    Retry,
    /// Re-execute the tracee's original syscall from the entry-stop
    /// registers; used after an injected syscall has done its work.
    ReplayOriginal,
}

/// Entry/exit hooks around one syscall of one tracee. Handlers return
/// `nix::Result` so the supervisor can tell a vanished tracee (`ESRCH`) from
/// a tracing failure.
pub trait SyscallHandler {
    fn name(&self) -> &'static str;

    /// Runs at the seccomp entry stop. May rewrite arguments (after saving
    /// the originals into `state`) or divert the syscall entirely. Returns
    /// whether the supervisor should arrange for the exit stop; `false`
    /// means this syscall needs no post-processing.
    fn pre(&mut self, tracee: &Tracee, state: &mut State, global: &mut GlobalState)
        -> nix::Result<bool>;

    /// Runs at the syscall exit stop with the result in the return register.
    fn post(
        &mut self,
        tracee: &Tracee,
        state: &mut State,
        global: &mut GlobalState,
    ) -> nix::Result<PostOutcome> {
        let _ = (tracee, state, global);
        Ok(PostOutcome::Done)
    }
}

/// Handler for one syscall number, or None for syscalls we let through
/// untouched (the seccomp filter normally keeps those from ever stopping).
pub fn handler_for(syscall_nr: u64) -> Option<Box<dyn SyscallHandler>> {
    let handler: Box<dyn SyscallHandler> = match syscall_nr as i64 {
        libc::SYS_read => Box::new(io::ReadWrite::read()),
        libc::SYS_write => Box::new(io::ReadWrite::write()),
        libc::SYS_getdents => Box::new(io::Getdents::new(DirentLayout::Legacy, "getdents")),
        libc::SYS_getdents64 => Box::new(io::Getdents::new(DirentLayout::Wide, "getdents64")),
        libc::SYS_stat => Box::new(file::Stat::second_arg("stat")),
        libc::SYS_lstat => Box::new(file::Stat::second_arg("lstat")),
        libc::SYS_fstat => Box::new(file::Stat::second_arg("fstat")),
        libc::SYS_newfstatat => Box::new(file::Stat::third_arg("newfstatat")),
        libc::SYS_open => Box::new(file::OpenCount::first_arg("open")),
        libc::SYS_openat => Box::new(file::OpenCount::second_arg("openat")),
        libc::SYS_close => Box::new(file::Close),
        libc::SYS_unlink => Box::new(file::RemoveFile::new(file::RemoveKind::Unlink)),
        libc::SYS_unlinkat => Box::new(file::RemoveFile::new(file::RemoveKind::UnlinkAt)),
        libc::SYS_rmdir => Box::new(file::RemoveFile::new(file::RemoveKind::Rmdir)),
        libc::SYS_utimensat => Box::new(file::RemoveFile::new(file::RemoveKind::Utimens)),
        libc::SYS_time => Box::new(time::TimeCall::new(time::TimeKind::Time)),
        libc::SYS_gettimeofday => Box::new(time::TimeCall::new(time::TimeKind::GetTimeOfDay)),
        libc::SYS_clock_gettime => Box::new(time::TimeCall::new(time::TimeKind::ClockGetTime)),
        libc::SYS_getrandom => Box::new(random::GetRandom),
        _ => return None,
    };
    Some(handler)
}
