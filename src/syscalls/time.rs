//! Time virtualization: every time-observing syscall returns the logical
//! clock and advances it by one tick.

use crate::global_state::GlobalState;
use crate::state::State;
use crate::syscalls::{PostOutcome, SyscallHandler};
use crate::tracer::ptrace::Tracee;

#[derive(Clone, Copy)]
pub enum TimeKind {
    Time,
    GetTimeOfDay,
    ClockGetTime,
}

pub struct TimeCall {
    kind: TimeKind,
}

impl TimeCall {
    pub fn new(kind: TimeKind) -> TimeCall {
        TimeCall { kind }
    }
}

impl SyscallHandler for TimeCall {
    fn name(&self) -> &'static str {
        match self.kind {
            TimeKind::Time => "time",
            TimeKind::GetTimeOfDay => "gettimeofday",
            TimeKind::ClockGetTime => "clock_gettime",
        }
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
        _state: &mut State,
        global: &mut GlobalState,
    ) -> nix::Result<PostOutcome> {
        let mut regs = tracee.getregs()?;
        let now = global.logical_time();
        match self.kind {
            TimeKind::Time => {
                if (regs.ret_value() as i64) < 0 {
                    return Ok(PostOutcome::Done);
                }
                regs.set_ret_value(now);
                if regs.arg1() != 0 {
                    tracee.write_struct(regs.arg1(), &(now as i64))?;
                }
                tracee.setregs(&regs)?;
            }
            TimeKind::GetTimeOfDay => {
                if regs.ret_value() as i64 != 0 || regs.arg1() == 0 {
                    return Ok(PostOutcome::Done);
                }
                let tv = libc::timeval {
                    tv_sec: now as i64,
                    tv_usec: 0,
                };
                tracee.write_struct(regs.arg1(), &tv)?;
            }
            TimeKind::ClockGetTime => {
                if regs.ret_value() as i64 != 0 || regs.arg2() == 0 {
                    return Ok(PostOutcome::Done);
                }
                let ts = libc::timespec {
                    tv_sec: now as i64,
                    tv_nsec: 0,
                };
                tracee.write_struct(regs.arg2(), &ts)?;
            }
        }
        global.increment_time();
        global.counters.time_calls += 1;
        Ok(PostOutcome::Done)
    }
}
