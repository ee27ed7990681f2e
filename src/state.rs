use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::cpu::Regs;
use crate::dirents::DirEntryBuffers;
use crate::syscalls::SyscallHandler;

/// Bytes of directory entries buffered per getdents reply. This is what glibc
/// uses as its standard size, so do we.
pub const DIR_ENTRIES_BYTES: usize = 32768;

/// Everything the supervisor tracks for a single tracee between events. One
/// instance per pid, created when the pid is first observed and destroyed at
/// its exit.
pub struct State {
    pub tracee_pid: Pid,

    /// Buffered directory listings keyed by file descriptor, so repeated
    /// getdents calls observe a stable order. Dropped on exec, close and
    /// exit.
    pub dir_entries: DirEntryBuffers,

    /// Whether the next syscall stop is the entry stop. Only consulted on
    /// kernels whose seccomp reporting cannot tell the two apart.
    pub is_pre_exit: bool,

    /// Signal to hand to the tracee on its next resume.
    pub signal_to_deliver: Option<Signal>,

    /// Real inode captured by an injected stat ahead of a file-removing
    /// syscall, consumed when the removal succeeds (or at exit).
    pub inode_to_delete: Option<u64>,

    /// Register snapshot taken at the first post-hook, before any retries;
    /// retries are re-issued from this baseline.
    pub before_retry: Regs,

    /// Bytes moved so far across the retries of one read/write.
    pub total_bytes: u64,

    /// False once the current syscall has been replayed or injected over;
    /// ptrace cannot tell a replay from a first attempt, so we must.
    pub first_try: bool,

    /// The syscall currently finishing was planted by us, not the tracee.
    pub syscall_injected: bool,

    /// Registers as they stood at the entry stop, before any handler touched
    /// them. Replays of the original syscall restart from these.
    pub prev_registers: Regs,

    pub original_arg1: u64,
    pub original_arg2: u64,
    pub original_arg3: u64,
    pub original_arg4: u64,
    pub original_arg5: u64,

    /// The tracee has consumed its initial attach stop.
    pub started: bool,

    /// Handler armed at the entry stop; the post event dispatches to this
    /// same instance even when other tracees' events arrive in between.
    pub handler: Option<Box<dyn SyscallHandler>>,
}

impl State {
    pub fn new(tracee_pid: Pid) -> State {
        State {
            tracee_pid,
            dir_entries: DirEntryBuffers::new(),
            is_pre_exit: true,
            signal_to_deliver: None,
            inode_to_delete: None,
            before_retry: Regs::default(),
            total_bytes: 0,
            first_try: true,
            syscall_injected: false,
            prev_registers: Regs::default(),
            original_arg1: 0,
            original_arg2: 0,
            original_arg3: 0,
            original_arg4: 0,
            original_arg5: 0,
            started: false,
            handler: None,
        }
    }

    /// Reset the per-syscall bookkeeping once a syscall has fully settled.
    pub fn settle_syscall(&mut self) {
        self.first_try = true;
        self.syscall_injected = false;
        self.total_bytes = 0;
    }

    pub fn save_original_args(&mut self, regs: &Regs) {
        self.original_arg1 = regs.arg1();
        self.original_arg2 = regs.arg2();
        self.original_arg3 = regs.arg3();
        self.original_arg4 = regs.arg4();
        self.original_arg5 = regs.arg5();
    }
}
