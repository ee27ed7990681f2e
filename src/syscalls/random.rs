//! getrandom virtualization: the kernel's entropy is overwritten with a
//! fixed-seed stream, so two runs observe identical bytes.

use crate::global_state::GlobalState;
use crate::state::State;
use crate::syscalls::{PostOutcome, SyscallHandler};
use crate::tracer::ptrace::Tracee;

/// The kernel never returns more than this from one getrandom call.
const GETRANDOM_MAX: usize = 33_554_431;

pub struct GetRandom;

impl SyscallHandler for GetRandom {
    fn name(&self) -> &'static str {
        "getrandom"
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
        let len = (regs.arg2() as usize).min(GETRANDOM_MAX);
        let mut bytes = vec![0u8; len];
        global.rng.fill(&mut bytes);
        tracee.write_bytes(regs.arg1(), &bytes)?;
        regs.set_ret_value(len as u64);
        tracee.setregs(&regs)?;
        global.counters.getrandom_calls += 1;
        Ok(PostOutcome::Done)
    }
}
