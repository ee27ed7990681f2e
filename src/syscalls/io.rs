//! Byte-stream and directory I/O: short reads and writes are replayed until
//! the tracee observes one full-length result, directory listings are drained
//! and served back in a stable order.

use log::trace;

use crate::cpu::Regs;
use crate::dirents::{DirEntries, DirentLayout};
use crate::global_state::GlobalState;
use crate::state::{State, DIR_ENTRIES_BYTES};
use crate::syscalls::{PostOutcome, SyscallHandler};
use crate::tracer::ptrace::Tracee;

#[derive(Clone, Copy)]
enum Op {
    Read,
    Write,
}

/// Retries a short read/write by replaying the syscall with the buffer
/// pointer advanced and the count shrunk, until the request is satisfied,
/// the stream ends, or an error arrives. Scheduling-dependent short results
/// never reach the tracee.
pub struct ReadWrite {
    op: Op,
}

impl ReadWrite {
    pub fn read() -> ReadWrite {
        ReadWrite { op: Op::Read }
    }

    pub fn write() -> ReadWrite {
        ReadWrite { op: Op::Write }
    }

    /// Present the accumulated result to the tracee and restore its
    /// arguments. A first-try result is already what the kernel produced;
    /// nothing to patch then.
    fn settle(&self, tracee: &Tracee, state: &mut State, regs: &mut Regs) -> nix::Result<PostOutcome> {
        if !state.first_try {
            if state.total_bytes > 0 {
                regs.set_ret_value(state.total_bytes);
            }
            regs.set_arg2(state.original_arg2);
            regs.set_arg3(state.original_arg3);
            tracee.setregs(regs)?;
        }
        Ok(PostOutcome::Done)
    }
}

impl SyscallHandler for ReadWrite {
    fn name(&self) -> &'static str {
        match self.op {
            Op::Read => "read",
            Op::Write => "write",
        }
    }

    fn pre(
        &mut self,
        tracee: &Tracee,
        state: &mut State,
        _global: &mut GlobalState,
    ) -> nix::Result<bool> {
        if state.first_try {
            let regs = tracee.getregs()?;
            state.save_original_args(&regs);
        } else {
            // replayed attempt: pick up where the last one left off
            let mut regs = tracee.getregs()?;
            regs.set_arg2(state.original_arg2 + state.total_bytes);
            regs.set_arg3(state.original_arg3 - state.total_bytes);
            tracee.setregs(&regs)?;
        }
        Ok(true)
    }

    fn post(
        &mut self,
        tracee: &Tracee,
        state: &mut State,
        global: &mut GlobalState,
    ) -> nix::Result<PostOutcome> {
        let mut regs = tracee.getregs()?;
        let ret = regs.ret_value() as i64;

        if ret == -(libc::EAGAIN as i64) {
            // would-block: spin the syscall instead of surfacing a
            // scheduling-dependent error
            state.first_try = false;
            global.counters.replays_due_to_blocking += 1;
            return Ok(PostOutcome::Retry);
        }
        if ret < 0 {
            return self.settle(tracee, state, &mut regs);
        }

        state.total_bytes += ret as u64;
        if ret == 0 || state.total_bytes >= state.original_arg3 {
            return self.settle(tracee, state, &mut regs);
        }

        trace!(
            "[{}] short {}: {}/{} bytes",
            state.tracee_pid,
            self.name(),
            state.total_bytes,
            state.original_arg3
        );
        match self.op {
            Op::Read => global.counters.read_retries += 1,
            Op::Write => global.counters.write_retries += 1,
        }
        state.first_try = false;
        Ok(PostOutcome::Retry)
    }
}

/// Drains a directory through replays into the per-fd buffer, sorts it by
/// name, rewrites the inodes, then serves deterministic chunks. The real fd
/// position ends up at EOF after the drain, so later calls run the kernel
/// syscall as a no-op and only our buffer speaks.
pub struct Getdents {
    layout: DirentLayout,
    name: &'static str,
}

impl Getdents {
    pub fn new(layout: DirentLayout, name: &'static str) -> Getdents {
        Getdents { layout, name }
    }

    fn serve(
        &self,
        tracee: &Tracee,
        state: &mut State,
        fd: i32,
        mut regs: Regs,
    ) -> nix::Result<PostOutcome> {
        let buf_addr = regs.arg2();
        let budget = (regs.arg3() as usize).min(DIR_ENTRIES_BYTES);
        let entries = match state.dir_entries.get_mut(&fd) {
            Some(entries) => entries,
            None => return Ok(PostOutcome::Done),
        };
        let chunk = entries.next_chunk(budget);
        if chunk.is_empty() {
            if entries.has_records() {
                // caller's buffer cannot hold even one record
                regs.set_ret_value(-(libc::EINVAL as i64) as u64);
            } else {
                state.dir_entries.remove(&fd);
                regs.set_ret_value(0);
            }
        } else {
            tracee.write_bytes(buf_addr, &chunk)?;
            regs.set_ret_value(chunk.len() as u64);
        }
        tracee.setregs(&regs)?;
        Ok(PostOutcome::Done)
    }
}

impl SyscallHandler for Getdents {
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
        let fd = regs.arg1() as i32;
        let ret = regs.ret_value() as i64;

        if state.dir_entries.get(&fd).map_or(false, |e| e.ready()) {
            return self.serve(tracee, state, fd, regs);
        }

        if ret < 0 {
            return Ok(PostOutcome::Done);
        }
        if ret > 0 {
            // keep draining the kernel into our buffer
            let bytes = tracee.read_bytes(regs.arg2(), ret as usize)?;
            let entries = state
                .dir_entries
                .entry(fd)
                .or_insert_with(|| DirEntries::new(self.layout));
            entries.absorb(&bytes);
            state.first_try = false;
            return Ok(PostOutcome::Retry);
        }

        // the kernel is done; fix the order, virtualize, and answer from the
        // buffer from here on
        let entries = state
            .dir_entries
            .entry(fd)
            .or_insert_with(|| DirEntries::new(self.layout));
        let inode_map = &mut global.inode_map;
        entries.finalize(|ino| inode_map.add_real(ino));
        trace!("[{}] {} buffered fd {}", state.tracee_pid, self.name, fd);
        self.serve(tracee, state, fd, regs)
    }
}
