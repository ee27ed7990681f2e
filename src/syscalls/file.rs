//! Filesystem-metadata handlers: stat-family inode/mtime virtualization,
//! open counting for the randomness devices, dirent-buffer teardown on
//! close, and the stat-injection dance ahead of file-removing syscalls.

use std::mem;

use log::{debug, trace};

use crate::global_state::GlobalState;
use crate::state::State;
use crate::syscalls::{PostOutcome, SyscallHandler};
use crate::tracer::ptrace::Tracee;

/// The System V red zone below the stack pointer that leaf code may use.
const RED_ZONE: u64 = 128;

/// Which argument register carries the stat buffer.
#[derive(Clone, Copy)]
enum StatBufArg {
    Second,
    Third,
}

/// Rewrites every stat-like result: the tracee only ever sees virtual inodes
/// and the virtual mtime pinned at the inode's first observation.
pub struct Stat {
    name: &'static str,
    buf_arg: StatBufArg,
}

impl Stat {
    pub fn second_arg(name: &'static str) -> Stat {
        Stat {
            name,
            buf_arg: StatBufArg::Second,
        }
    }

    pub fn third_arg(name: &'static str) -> Stat {
        Stat {
            name,
            buf_arg: StatBufArg::Third,
        }
    }
}

impl SyscallHandler for Stat {
    fn name(&self) -> &'static str {
        self.name
    }

    fn pre(
        &mut self,
        _tracee: &Tracee,
        _state: &mut State,
        _global: &mut GlobalState,
    ) -> nix::Result<bool> {
        Ok(true)
    }

    fn post(
        &mut self,
        tracee: &Tracee,
        state: &mut State,
        global: &mut GlobalState,
    ) -> nix::Result<PostOutcome> {
        let regs = tracee.getregs()?;
        if regs.ret_value() as i64 != 0 {
            return Ok(PostOutcome::Done);
        }
        let addr = match self.buf_arg {
            StatBufArg::Second => regs.arg2(),
            StatBufArg::Third => regs.arg3(),
        };
        let mut st: libc::stat = tracee.read_struct(addr)?;
        let mtime = global.observe_mtime(st.st_ino) as i64;
        let vino = global.inode_map.add_real(st.st_ino);
        trace!("[{}] {}: inode {} -> {}", state.tracee_pid, self.name, st.st_ino, vino);
        st.st_ino = vino;
        st.st_mtime = mtime;
        st.st_mtime_nsec = 0;
        st.st_atime = mtime;
        st.st_atime_nsec = 0;
        st.st_ctime = mtime;
        st.st_ctime_nsec = 0;
        tracee.write_struct(addr, &st)?;
        Ok(PostOutcome::Done)
    }
}

/// Which argument register carries the pathname.
#[derive(Clone, Copy)]
enum PathArg {
    First,
    Second,
}

/// Counts opens of the kernel randomness devices. Opens, not reads: fds are
/// not tracked back to files, so this is the best accounting available.
pub struct OpenCount {
    name: &'static str,
    path_arg: PathArg,
}

impl OpenCount {
    pub fn first_arg(name: &'static str) -> OpenCount {
        OpenCount {
            name,
            path_arg: PathArg::First,
        }
    }

    pub fn second_arg(name: &'static str) -> OpenCount {
        OpenCount {
            name,
            path_arg: PathArg::Second,
        }
    }
}

impl SyscallHandler for OpenCount {
    fn name(&self) -> &'static str {
        self.name
    }

    fn pre(
        &mut self,
        tracee: &Tracee,
        state: &mut State,
        global: &mut GlobalState,
    ) -> nix::Result<bool> {
        let regs = tracee.getregs()?;
        let path_addr = match self.path_arg {
            PathArg::First => regs.arg1(),
            PathArg::Second => regs.arg2(),
        };
        let path = tracee.read_cstring(path_addr)?;
        if path == b"/dev/urandom" {
            debug!("[{}] tracee opens /dev/urandom", state.tracee_pid);
            global.counters.dev_urandom_opens += 1;
        } else if path == b"/dev/random" {
            debug!("[{}] tracee opens /dev/random", state.tracee_pid);
            global.counters.dev_random_opens += 1;
        }
        Ok(false)
    }
}

/// Drops the dirent buffer of a closing fd; the next directory pass must
/// drain the kernel again.
pub struct Close;

impl SyscallHandler for Close {
    fn name(&self) -> &'static str {
        "close"
    }

    fn pre(
        &mut self,
        tracee: &Tracee,
        state: &mut State,
        _global: &mut GlobalState,
    ) -> nix::Result<bool> {
        let regs = tracee.getregs()?;
        state.dir_entries.remove(&(regs.arg1() as i32));
        Ok(false)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum RemoveKind {
    Unlink,
    UnlinkAt,
    Rmdir,
    Utimens,
}

/// The filesystem may hand a removed file's inode number to the next file it
/// creates, which would alias two distinct files in the registries. A stat
/// of the doomed path after removal fails, so the order is inverted: the
/// pre-hook diverts the first attempt into `newfstatat`, the captured inode
/// lands in `inodeToDelete`, the original syscall is replayed, and its
/// post-hook erases the registrations.
///
/// `utimensat` rides the same machinery but only invalidates the mtime
/// mapping, so the next stat re-pins the file at the current logical clock.
pub struct RemoveFile {
    kind: RemoveKind,
}

impl RemoveFile {
    pub fn new(kind: RemoveKind) -> RemoveFile {
        RemoveFile { kind }
    }
}

impl SyscallHandler for RemoveFile {
    fn name(&self) -> &'static str {
        match self.kind {
            RemoveKind::Unlink => "unlink",
            RemoveKind::UnlinkAt => "unlinkat",
            RemoveKind::Rmdir => "rmdir",
            RemoveKind::Utimens => "utimensat",
        }
    }

    fn pre(
        &mut self,
        tracee: &Tracee,
        state: &mut State,
        global: &mut GlobalState,
    ) -> nix::Result<bool> {
        if !state.first_try {
            // the replayed original; let it run for real now
            return Ok(true);
        }
        let mut regs = tracee.getregs()?;
        let at_cwd = libc::AT_FDCWD as i64 as u64;
        let nofollow = libc::AT_SYMLINK_NOFOLLOW as u64;
        let (dirfd, path_addr, at_flags) = match self.kind {
            RemoveKind::Unlink | RemoveKind::Rmdir => (at_cwd, regs.arg1(), nofollow),
            RemoveKind::UnlinkAt => (regs.arg1(), regs.arg2(), nofollow),
            RemoveKind::Utimens => {
                if regs.arg2() == 0 {
                    // futimens form: no pathname to stat
                    return Ok(true);
                }
                (regs.arg1(), regs.arg2(), regs.arg4())
            }
        };
        state.save_original_args(&regs);
        state.inode_to_delete = None;

        // park the stat record below the red zone of the tracee's stack
        let statbuf = regs.sp() - RED_ZONE - mem::size_of::<libc::stat>() as u64;
        regs.set_syscall_nr(libc::SYS_newfstatat as u64);
        regs.set_arg1(dirfd);
        regs.set_arg2(path_addr);
        regs.set_arg3(statbuf);
        regs.set_arg4(at_flags);
        tracee.setregs(&regs)?;

        state.first_try = false;
        state.syscall_injected = true;
        global.counters.injected_syscalls += 1;
        trace!("[{}] {}: injected stat for doomed inode", state.tracee_pid, self.name());
        Ok(true)
    }

    fn post(
        &mut self,
        tracee: &Tracee,
        state: &mut State,
        global: &mut GlobalState,
    ) -> nix::Result<PostOutcome> {
        let regs = tracee.getregs()?;
        if state.syscall_injected {
            // exit of the injected stat
            state.syscall_injected = false;
            if regs.ret_value() as i64 == 0 {
                let st: libc::stat = tracee.read_struct(regs.arg3())?;
                state.inode_to_delete = Some(st.st_ino);
            }
            return Ok(PostOutcome::ReplayOriginal);
        }

        if regs.ret_value() as i64 == 0 {
            if let Some(ino) = state.inode_to_delete.take() {
                debug!("[{}] {}: retiring inode {}", state.tracee_pid, self.name(), ino);
                match self.kind {
                    RemoveKind::Utimens => {
                        global.mtime_map.erase_real(ino);
                    }
                    _ => {
                        global.inode_map.erase_real(ino);
                        global.mtime_map.erase_real(ino);
                    }
                }
            }
        } else {
            state.inode_to_delete = None;
        }
        Ok(PostOutcome::Done)
    }
}
