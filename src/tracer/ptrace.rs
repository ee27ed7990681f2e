use libc::{c_long, c_void};
use nix::errno::Errno;
use nix::sys::ptrace::{self, AddressType, Options, Request, RequestType};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::{mem, ptr};

use crate::cpu::Regs;

/// The kernel moves tracee memory one machine word at a time.
const WORD_SIZE: usize = 8;

/// Longest C string we are willing to pull out of a tracee.
const CSTRING_MAX: usize = 4096;

/// Handle on one stopped tracee. Stateless beyond the pid: all calls go
/// straight to the kernel debugging interface and report `nix::Result`, so
/// callers can tell an expected `ESRCH` (the tracee just died) from a fatal
/// tracing failure.
#[derive(Clone, Copy, Debug)]
pub struct Tracee {
    pub pid: Pid,
}

/// Get user registers, as with `ptrace(PTRACE_GETREGS, ...)`
fn getregs(pid: Pid) -> nix::Result<Regs> {
    ptrace_get_data::<Regs>(Request::PTRACE_GETREGS, pid)
}

/// Set user registers, as with `ptrace(PTRACE_SETREGS, ...)`
fn setregs(pid: Pid, regs: &Regs) -> nix::Result<()> {
    let res = unsafe {
        libc::ptrace(
            Request::PTRACE_SETREGS as RequestType,
            libc::pid_t::from(pid),
            ptr::null_mut::<c_void>(),
            regs as *const _ as *const c_void,
        )
    };
    Errno::result(res).map(drop)
}

/// Function for ptrace requests that return values from the data field.
/// Some ptrace get requests populate structs or larger elements than `c_long`
/// and therefore use the data field to return values. This function handles
/// these requests.
fn ptrace_get_data<T>(request: Request, pid: Pid) -> nix::Result<T> {
    let mut data = mem::MaybeUninit::uninit();
    let res = unsafe {
        libc::ptrace(
            request as RequestType,
            libc::pid_t::from(pid),
            ptr::null_mut::<T>(),
            data.as_mut_ptr() as *const _ as *const c_void,
        )
    };
    Errno::result(res)?;
    Ok(unsafe { data.assume_init() })
}

impl Tracee {
    pub fn new(pid: Pid) -> Tracee {
        Tracee { pid }
    }

    pub fn getregs(&self) -> nix::Result<Regs> {
        getregs(self.pid)
    }

    pub fn setregs(&self, regs: &Regs) -> nix::Result<()> {
        setregs(self.pid, regs)
    }

    /// Resume until the next event of interest (seccomp stop, ptrace event,
    /// signal), optionally delivering a signal.
    pub fn cont(&self, sig: Option<Signal>) -> nix::Result<()> {
        ptrace::cont(self.pid, sig)
    }

    /// Resume until the syscall exit stop.
    pub fn step_to_syscall_exit(&self, sig: Option<Signal>) -> nix::Result<()> {
        ptrace::syscall(self.pid, sig)
    }

    /// Wrapper around PTRACE_GETEVENTMSG, which carries the new pid on
    /// fork/clone events.
    pub fn event_message(&self) -> nix::Result<c_long> {
        ptrace::getevent(self.pid)
    }

    /// Tracing options for a freshly attached root tracee: seccomp stops,
    /// the whole descendant tree, exit notification, and tearing the tree
    /// down with us if the supervisor dies.
    pub fn set_tracing_options(&self) -> nix::Result<()> {
        ptrace::setoptions(
            self.pid,
            Options::PTRACE_O_TRACESECCOMP
                | Options::PTRACE_O_TRACECLONE
                | Options::PTRACE_O_TRACEFORK
                | Options::PTRACE_O_TRACEVFORK
                | Options::PTRACE_O_TRACEEXEC
                | Options::PTRACE_O_TRACEEXIT
                | Options::PTRACE_O_TRACESYSGOOD
                | Options::PTRACE_O_EXITKILL,
        )
    }

    /// Read `len` bytes from the tracee, one word at a time. The final word
    /// may read past `len` inside the tracee; only `len` bytes are returned.
    pub fn read_bytes(&self, addr: u64, len: usize) -> nix::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(len + WORD_SIZE);
        let mut offset = 0;
        while bytes.len() < len {
            let word = ptrace::read(self.pid, (addr + offset) as AddressType)?;
            bytes.extend_from_slice(&word.to_ne_bytes());
            offset += WORD_SIZE as u64;
        }
        bytes.truncate(len);
        Ok(bytes)
    }

    /// Write bytes into the tracee. Full words are poked directly; a
    /// trailing partial word is merged over the tracee's existing memory so
    /// bytes past the end stay intact.
    pub fn write_bytes(&self, addr: u64, bytes: &[u8]) -> nix::Result<()> {
        let mut offset = 0;
        while offset < bytes.len() {
            let dest = (addr + offset as u64) as AddressType;
            let remaining = bytes.len() - offset;
            if remaining >= WORD_SIZE {
                let mut raw = [0u8; WORD_SIZE];
                raw.copy_from_slice(&bytes[offset..offset + WORD_SIZE]);
                let word = c_long::from_ne_bytes(raw);
                unsafe { ptrace::write(self.pid, dest, word as *mut c_void)? };
                offset += WORD_SIZE;
            } else {
                let existing = ptrace::read(self.pid, dest)?;
                let mut raw = existing.to_ne_bytes();
                raw[..remaining].copy_from_slice(&bytes[offset..]);
                let word = c_long::from_ne_bytes(raw);
                unsafe { ptrace::write(self.pid, dest, word as *mut c_void)? };
                offset += remaining;
            }
        }
        Ok(())
    }

    /// Read a typed record from the tracee at `addr`. Record types holding
    /// pointers still point into the tracee; chase those separately.
    pub fn read_struct<T: Copy>(&self, addr: u64) -> nix::Result<T> {
        let bytes = self.read_bytes(addr, mem::size_of::<T>())?;
        Ok(unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) })
    }

    /// Write a typed record into the tracee at `addr`, preserving tracee
    /// memory past the record's end.
    pub fn write_struct<T: Copy>(&self, addr: u64, val: &T) -> nix::Result<()> {
        let bytes =
            unsafe { std::slice::from_raw_parts(val as *const T as *const u8, mem::size_of::<T>()) };
        self.write_bytes(addr, bytes)
    }

    /// Read a NUL-terminated byte string, without the NUL. Undefined results
    /// if `addr` does not actually hold a C string.
    pub fn read_cstring(&self, addr: u64) -> nix::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut offset = 0;
        while bytes.len() < CSTRING_MAX {
            let word = ptrace::read(self.pid, (addr + offset) as AddressType)?;
            for b in word.to_ne_bytes().iter() {
                if *b == 0 {
                    return Ok(bytes);
                }
                bytes.push(*b);
            }
            offset += WORD_SIZE as u64;
        }
        Ok(bytes)
    }
}
