#[cfg(target_arch = "x86_64")]
mod arch {
    /// Register file of a stopped tracee, laid out like the kernel's
    /// `user_regs_struct`.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Regs {
        pub r15: u64,
        pub r14: u64,
        pub r13: u64,
        pub r12: u64,
        pub rbp: u64,
        pub rbx: u64,
        pub r11: u64,
        pub r10: u64,
        pub r9: u64,
        pub r8: u64,
        pub rax: u64,
        pub rcx: u64,
        pub rdx: u64,
        pub rsi: u64,
        pub rdi: u64,
        pub orig_rax: u64,
        pub rip: u64,
        pub cs: u64,
        pub eflags: u64,
        pub rsp: u64,
        pub ss: u64,
        pub fs_base: u64,
        pub gs_base: u64,
        pub ds: u64,
        pub es: u64,
        pub fs: u64,
        pub gs: u64,
    }

    impl Regs {
        pub fn ip(&self) -> u64 {
            self.rip
        }

        pub fn set_ip(&mut self, val: u64) {
            self.rip = val;
        }

        pub fn sp(&self) -> u64 {
            self.rsp
        }

        /// Syscall number as captured at syscall entry.
        pub fn syscall_nr(&self) -> u64 {
            self.orig_rax
        }

        pub fn set_syscall_nr(&mut self, val: u64) {
            self.orig_rax = val;
        }

        /// At a syscall exit stop this holds the return value; errors arrive
        /// as negated errno in two's complement.
        pub fn ret_value(&self) -> u64 {
            self.rax
        }

        pub fn set_ret_value(&mut self, val: u64) {
            self.rax = val;
        }

        pub fn arg1(&self) -> u64 {
            self.rdi
        }

        pub fn arg2(&self) -> u64 {
            self.rsi
        }

        pub fn arg3(&self) -> u64 {
            self.rdx
        }

        pub fn arg4(&self) -> u64 {
            self.r10
        }

        pub fn arg5(&self) -> u64 {
            self.r8
        }

        pub fn arg6(&self) -> u64 {
            self.r9
        }

        pub fn set_arg1(&mut self, val: u64) {
            self.rdi = val;
        }

        pub fn set_arg2(&mut self, val: u64) {
            self.rsi = val;
        }

        pub fn set_arg3(&mut self, val: u64) {
            self.rdx = val;
        }

        pub fn set_arg4(&mut self, val: u64) {
            self.r10 = val;
        }

        pub fn set_arg5(&mut self, val: u64) {
            self.r8 = val;
        }

        pub fn set_arg6(&mut self, val: u64) {
            self.r9 = val;
        }
    }

    // $ rasm2 -a x86 -b 64 'syscall'
    pub const SYSCALL_SIZE: u64 = 2;
}

pub use arch::*;
