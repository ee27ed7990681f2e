//! The supervisor: drives the whole tracee tree off the kernel's event
//! stream, one event per iteration, and owns all mutation of the global
//! registries.

use std::collections::HashMap;

use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use simple_error::{bail, try_with};

use crate::cpu::SYSCALL_SIZE;
use crate::global_state::{EventCounters, GlobalState};
use crate::result::Result;
use crate::state::State;
use crate::syscalls::{handler_for, PostOutcome};

pub mod ptrace;

use crate::tracer::ptrace::Tracee;

#[derive(Clone, Copy, Debug)]
enum NewChildKind {
    Fork,
    VFork,
    Clone,
}

#[derive(Clone, Copy)]
enum ResumeMode {
    /// Run until the next seccomp stop, ptrace event or signal.
    Cont,
    /// Stop again at the exit of the current syscall.
    SyscallExit,
}

/// Distinguish the one expected tracing failure: the tracee died under our
/// hands (`ESRCH`). The current event is then abandoned; its exit
/// notification is already queued. Everything else invalidates our model of
/// the tracee and is fatal.
fn unless_vanished<T>(res: nix::Result<T>, pid: Pid, what: &str) -> Result<Option<T>> {
    match res {
        Ok(val) => Ok(Some(val)),
        Err(Errno::ESRCH) => {
            debug!("[{}] tracee vanished during {}", pid, what);
            Ok(None)
        }
        Err(err) => bail!("{} failed on tracee {}: {}", what, pid, err),
    }
}

/// Resume one tracee, delivering and clearing any pending signal.
fn resume_tracee(state: &mut State, mode: ResumeMode) -> Result<()> {
    let tracee = Tracee::new(state.tracee_pid);
    let sig = state.signal_to_deliver.take();
    let res = match mode {
        ResumeMode::Cont => tracee.cont(sig),
        ResumeMode::SyscallExit => tracee.step_to_syscall_exit(sig),
    };
    unless_vanished(res, state.tracee_pid, "resume").map(drop)
}

fn release_at_least(release: &str, want_major: u32, want_minor: u32) -> bool {
    let mut fields = release.split(|c: char| !c.is_ascii_digit());
    let major: u32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let minor: u32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    (major, minor) >= (want_major, want_minor)
}

/// Since 4.8 the kernel reports a dedicated seccomp stop before syscall
/// entry; older kernels make us disambiguate entry from exit ourselves.
fn kernel_reports_seccomp_entry() -> bool {
    release_at_least(nix::sys::utsname::uname().release(), 4, 8)
}

/// The per-run state machine over all tracees. Single-threaded: the kernel
/// serializes tracee events into one stream, we consume exactly one per
/// iteration.
pub struct Supervisor {
    root: Pid,
    global: GlobalState,
    states: HashMap<Pid, State>,
    legacy_seccomp: bool,
    root_status: Option<i32>,
    last_status: i32,
}

impl Supervisor {
    /// Adopt a child that has stopped itself after PTRACE_TRACEME. Blocks
    /// until that stop is observed, then sets the tracing options.
    pub fn attach(root: Pid) -> Result<Supervisor> {
        let status = try_with!(waitpid(root, None), "cannot await the tracee's initial stop");
        match status {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => {}
            other => bail!("tracee did not park itself in SIGSTOP: {:?}", other),
        }
        let tracee = Tracee::new(root);
        try_with!(tracee.set_tracing_options(), "cannot set tracing options");

        let mut global = GlobalState::new();
        global.add_thread(root);
        global.add_thread_group_member(root, root);

        let mut root_state = State::new(root);
        root_state.started = true;
        let mut states = HashMap::new();
        states.insert(root, root_state);

        let legacy_seccomp = !kernel_reports_seccomp_entry();
        if legacy_seccomp {
            debug!("old kernel: tracking syscall entry/exit phase ourselves");
        }
        Ok(Supervisor {
            root,
            global,
            states,
            legacy_seccomp,
            root_status: None,
            last_status: 0,
        })
    }

    pub fn counters(&self) -> EventCounters {
        self.global.counters
    }

    /// Consume events until the live-thread set empties, then report the
    /// root tracee's exit status.
    pub fn run(&mut self) -> Result<i32> {
        let root = self.root;
        let root_state = match self.states.get_mut(&root) {
            Some(state) => state,
            None => bail!("root tracee {} has no state", root),
        };
        resume_tracee(root_state, ResumeMode::Cont)?;

        loop {
            let status = try_with!(
                waitpid(None::<Pid>, Some(WaitPidFlag::__WALL)),
                "waiting for tracee events failed"
            );
            match status {
                WaitStatus::PtraceEvent(pid, _, event) => match event {
                    libc::PTRACE_EVENT_SECCOMP => self.handle_seccomp(pid)?,
                    libc::PTRACE_EVENT_FORK => self.handle_new_child(pid, NewChildKind::Fork)?,
                    libc::PTRACE_EVENT_VFORK => self.handle_new_child(pid, NewChildKind::VFork)?,
                    libc::PTRACE_EVENT_CLONE => self.handle_new_child(pid, NewChildKind::Clone)?,
                    libc::PTRACE_EVENT_EXEC => self.handle_exec(pid)?,
                    libc::PTRACE_EVENT_EXIT => self.handle_event_exit(pid)?,
                    other => {
                        warn!("[{}] unexpected ptrace event {}", pid, other);
                        self.resume_unknown(pid)?;
                    }
                },
                WaitStatus::PtraceSyscall(pid) => self.handle_post(pid)?,
                WaitStatus::Stopped(pid, signal) => self.handle_signal(pid, signal)?,
                WaitStatus::Exited(pid, code) => {
                    if self.handle_reaped(pid, code) {
                        break;
                    }
                }
                WaitStatus::Signaled(pid, signal, _) => {
                    if self.handle_reaped(pid, 128 + signal as i32) {
                        break;
                    }
                }
                WaitStatus::Continued(pid) => trace!("[{}] continued", pid),
                WaitStatus::StillAlive => {}
            }
        }
        Ok(self.root_status.unwrap_or(self.last_status))
    }

    /// Pre-hook: a syscall of interest is about to run. Arm a handler, let
    /// it inspect or rewrite the entry, and decide whether the exit stop is
    /// needed.
    fn handle_seccomp(&mut self, pid: Pid) -> Result<()> {
        let tracee = Tracee::new(pid);
        let legacy = self.legacy_seccomp;
        let global = &mut self.global;
        let state = self.states.entry(pid).or_insert_with(|| State::new(pid));

        let regs = match unless_vanished(tracee.getregs(), pid, "reading entry registers")? {
            Some(regs) => regs,
            None => return Ok(()),
        };
        state.prev_registers = regs;
        if legacy {
            state.is_pre_exit = true;
        }

        let nr = regs.syscall_nr();
        let mut handler = match state.handler.take().or_else(|| handler_for(nr)) {
            Some(handler) => handler,
            None => {
                trace!("[{}] letting syscall {} through", pid, nr);
                return resume_tracee(state, ResumeMode::Cont);
            }
        };
        trace!("[{}] {} entry", pid, handler.name());
        let expect_post = match unless_vanished(handler.pre(&tracee, state, global), pid, "pre-hook")? {
            Some(expect_post) => expect_post,
            None => return Ok(()),
        };
        if expect_post {
            state.handler = Some(handler);
            resume_tracee(state, ResumeMode::SyscallExit)
        } else {
            resume_tracee(state, ResumeMode::Cont)
        }
    }

    /// Post-hook: the armed handler inspects the result, and either settles,
    /// retries from the pre-retry baseline, or replays the tracee's original
    /// syscall after an injection.
    fn handle_post(&mut self, pid: Pid) -> Result<()> {
        let tracee = Tracee::new(pid);
        let legacy = self.legacy_seccomp;
        let global = &mut self.global;
        let state = match self.states.get_mut(&pid) {
            Some(state) => state,
            None => {
                warn!("[{}] syscall stop for unknown tracee", pid);
                return self.resume_unknown(pid);
            }
        };

        if legacy && state.is_pre_exit {
            // the extra entry stop old kernels deliver; skip ahead
            state.is_pre_exit = false;
            return resume_tracee(state, ResumeMode::SyscallExit);
        }
        state.is_pre_exit = true;

        let mut handler = match state.handler.take() {
            Some(handler) => handler,
            None => return resume_tracee(state, ResumeMode::Cont),
        };
        let regs = match unless_vanished(tracee.getregs(), pid, "reading exit registers")? {
            Some(regs) => regs,
            None => return Ok(()),
        };
        if state.first_try {
            state.before_retry = regs;
        }
        let outcome = match unless_vanished(handler.post(&tracee, state, global), pid, "post-hook")? {
            Some(outcome) => outcome,
            None => return Ok(()),
        };
        trace!("[{}] {} exit: {:?}", pid, handler.name(), outcome);
        match outcome {
            PostOutcome::Done => {
                state.settle_syscall();
                resume_tracee(state, ResumeMode::Cont)
            }
            PostOutcome::Retry => {
                global.counters.total_replays += 1;
                let nr = state.prev_registers.syscall_nr();
                let mut regs = state.before_retry;
                regs.set_ip(regs.ip() - SYSCALL_SIZE);
                // the re-executed instruction reads the syscall number from
                // the return-value register
                regs.set_ret_value(nr);
                regs.set_syscall_nr(nr);
                if unless_vanished(tracee.setregs(&regs), pid, "rewinding for retry")?.is_none() {
                    return Ok(());
                }
                state.handler = Some(handler);
                resume_tracee(state, ResumeMode::Cont)
            }
            PostOutcome::ReplayOriginal => {
                global.counters.total_replays += 1;
                let mut regs = state.prev_registers;
                regs.set_ip(regs.ip() - SYSCALL_SIZE);
                regs.set_ret_value(regs.syscall_nr());
                if unless_vanished(tracee.setregs(&regs), pid, "replaying original syscall")?.is_none() {
                    return Ok(());
                }
                state.handler = Some(handler);
                resume_tracee(state, ResumeMode::Cont)
            }
        }
    }

    /// A tracee forked or cloned: register the new pid, attribute it to a
    /// thread group, and give it fresh per-tracee state.
    fn handle_new_child(&mut self, parent: Pid, kind: NewChildKind) -> Result<()> {
        let tracee = Tracee::new(parent);
        let child = match unless_vanished(tracee.event_message(), parent, "reading child pid")? {
            Some(msg) => Pid::from_raw(msg as libc::pid_t),
            None => return Ok(()),
        };
        let group = match kind {
            NewChildKind::Clone => {
                let flags = match unless_vanished(tracee.getregs(), parent, "reading clone flags")? {
                    Some(regs) => regs.arg1(),
                    None => return Ok(()),
                };
                if flags & libc::CLONE_THREAD as u64 != 0 {
                    self.global.thread_group_of(parent).unwrap_or(parent)
                } else {
                    child
                }
            }
            NewChildKind::Fork | NewChildKind::VFork => child,
        };
        debug!("[{}] {:?} created {} in thread group {}", parent, kind, child, group);
        self.global.add_thread(child);
        self.global.add_thread_group_member(group, child);
        self.states.entry(child).or_insert_with(|| State::new(child));
        // the child resumes once its own initial stop arrives
        match self.states.get_mut(&parent) {
            Some(parent_state) => resume_tracee(parent_state, ResumeMode::Cont),
            None => self.resume_unknown(parent),
        }
    }

    /// Exec wipes the old address space; the dirent buffers referred to it.
    /// Everything else about the pid stays.
    fn handle_exec(&mut self, pid: Pid) -> Result<()> {
        match self.states.get_mut(&pid) {
            Some(state) => {
                trace!("[{}] exec", pid);
                state.dir_entries.clear();
                resume_tracee(state, ResumeMode::Cont)
            }
            None => self.resume_unknown(pid),
        }
    }

    /// The tracee is stopped on its way out but not yet gone: last chance to
    /// apply a pending inode retirement captured by an injected stat.
    fn handle_event_exit(&mut self, pid: Pid) -> Result<()> {
        match self.states.get_mut(&pid) {
            Some(state) => {
                if let Some(ino) = state.inode_to_delete.take() {
                    debug!("[{}] retiring inode {} at exit", pid, ino);
                    self.global.inode_map.erase_real(ino);
                    self.global.mtime_map.erase_real(ino);
                }
                resume_tracee(state, ResumeMode::Cont)
            }
            None => self.resume_unknown(pid),
        }
    }

    /// A real signal for the tracee: deliver it on the next resume. The
    /// initial SIGSTOP of an auto-attached child is consumed here, not
    /// forwarded; the child may even arrive before its parent's fork event
    /// names it.
    fn handle_signal(&mut self, pid: Pid, signal: Signal) -> Result<()> {
        let state = self.states.entry(pid).or_insert_with(|| State::new(pid));
        if !state.started && signal == Signal::SIGSTOP {
            trace!("[{}] consumed initial stop", pid);
            state.started = true;
            self.global.add_thread(pid);
            return resume_tracee(state, ResumeMode::Cont);
        }
        trace!("[{}] forwarding signal {}", pid, signal);
        state.signal_to_deliver = Some(signal);
        resume_tracee(state, ResumeMode::Cont)
    }

    /// The pid is gone for good: drop every trace of it. Returns true when
    /// the whole tree has exited.
    fn handle_reaped(&mut self, pid: Pid, status: i32) -> bool {
        debug!("[{}] reaped with status {}", pid, status);
        self.states.remove(&pid);
        self.global.remove_thread_group_member(pid);
        let tree_empty = self.global.remove_thread(pid);
        if pid == self.root {
            self.root_status = Some(status);
        }
        self.last_status = status;
        tree_empty
    }

    fn resume_unknown(&self, pid: Pid) -> Result<()> {
        unless_vanished(Tracee::new(pid).cont(None), pid, "resume").map(drop)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;
    use std::process::{Command, Stdio};
    use std::sync::Mutex;
    use std::time::Duration;

    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;
    use tempfile::tempdir;

    use super::release_at_least;
    use crate::{trace_command, TraceOptions, TraceOutcome};

    // Each test traces its own process tree with waitpid(-1); two concurrent
    // supervisors (or a supervisor next to Command::wait) would steal each
    // other's wait statuses.
    static TRACE_LOCK: Mutex<()> = Mutex::new(());

    fn compile_executable(source: &str, target: &Path) {
        let cc = std::env::var("CC").unwrap_or_else(|_| String::from("cc"));
        let args = &[
            "-xc",
            "-",
            "-g",
            "-Wall",
            "-static",
            "-o",
            target.to_str().expect("target path is valid utf-8"),
        ];
        let mut child = Command::new(cc)
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
            .expect("cannot compile program");
        {
            let stdin = child.stdin.as_mut().expect("cannot get child stdin");
            stdin
                .write_all(source.as_bytes())
                .expect("cannot write stdin");
        }
        assert!(child.wait().expect("process failed").success());
    }

    fn run_traced(program: &Path, args: &[&Path]) -> TraceOutcome {
        let mut command = vec![program.to_str().expect("utf-8").to_string()];
        command.extend(args.iter().map(|p| p.to_str().expect("utf-8").to_string()));
        trace_command(&TraceOptions { command }).expect("tracing failed")
    }

    fn read_out(path: &Path) -> String {
        std::fs::read_to_string(path).expect("tracee wrote its result file")
    }

    #[test]
    fn parses_kernel_releases() {
        assert!(release_at_least("5.15.0-91-generic", 4, 8));
        assert!(release_at_least("4.8.0", 4, 8));
        assert!(!release_at_least("4.7.10-200.fc24.x86_64", 4, 8));
        assert!(!release_at_least("3.10.0", 4, 8));
        assert!(release_at_least("6.1", 4, 8));
    }

    #[test]
    fn stat_twice_sees_one_virtual_inode() {
        let _guard = TRACE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().expect("cannot create tempdir");
        let target = dir.path().join("a");
        std::fs::write(&target, b"payload").expect("cannot create test file");
        let binary = dir.path().join("main");
        compile_executable(
            r#"
#include <sys/stat.h>
#include <fcntl.h>
#include <stdio.h>
#include <unistd.h>
int main(int argc, char **argv) {
  struct stat s1, s2;
  char buf[256];
  if (stat(argv[1], &s1) != 0) return 1;
  if (stat(argv[1], &s2) != 0) return 1;
  int n = snprintf(buf, sizeof(buf), "%llu %llu %lld %lld\n",
                   (unsigned long long)s1.st_ino, (unsigned long long)s2.st_ino,
                   (long long)s1.st_mtime, (long long)s2.st_mtime);
  int fd = open(argv[2], O_WRONLY | O_CREAT | O_TRUNC, 0644);
  if (fd < 0) return 1;
  write(fd, buf, n);
  return 0;
}
"#,
            &binary,
        );
        let out = dir.path().join("out");
        let outcome = run_traced(&binary, &[&target, &out]);
        assert_eq!(outcome.exit_status, 0);
        assert_eq!(read_out(&out), "1 1 744847200 744847200\n");
    }

    #[test]
    fn two_files_get_distinct_virtual_inodes() {
        let _guard = TRACE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().expect("cannot create tempdir");
        let file_a = dir.path().join("a");
        let file_b = dir.path().join("b");
        std::fs::write(&file_a, b"a").expect("cannot create test file");
        std::fs::write(&file_b, b"b").expect("cannot create test file");
        let binary = dir.path().join("main");
        compile_executable(
            r#"
#include <sys/stat.h>
#include <fcntl.h>
#include <stdio.h>
#include <unistd.h>
int main(int argc, char **argv) {
  struct stat s1, s2;
  char buf[128];
  if (stat(argv[1], &s1) != 0) return 1;
  if (stat(argv[2], &s2) != 0) return 1;
  int n = snprintf(buf, sizeof(buf), "%llu %llu\n",
                   (unsigned long long)s1.st_ino, (unsigned long long)s2.st_ino);
  int fd = open(argv[3], O_WRONLY | O_CREAT | O_TRUNC, 0644);
  if (fd < 0) return 1;
  write(fd, buf, n);
  return 0;
}
"#,
            &binary,
        );
        let out = dir.path().join("out");
        let outcome = run_traced(&binary, &[&file_a, &file_b, &out]);
        assert_eq!(outcome.exit_status, 0);
        assert_eq!(read_out(&out), "1 2\n");
    }

    #[test]
    fn recreated_file_never_reuses_a_virtual_inode() {
        let _guard = TRACE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().expect("cannot create tempdir");
        let target = dir.path().join("a");
        std::fs::write(&target, b"first life").expect("cannot create test file");
        let binary = dir.path().join("main");
        compile_executable(
            r#"
#include <sys/stat.h>
#include <fcntl.h>
#include <stdio.h>
#include <unistd.h>
int main(int argc, char **argv) {
  struct stat s1, s2;
  char buf[128];
  if (stat(argv[1], &s1) != 0) return 1;
  if (unlink(argv[1]) != 0) return 1;
  int fd = open(argv[1], O_WRONLY | O_CREAT | O_TRUNC, 0644);
  if (fd < 0) return 1;
  close(fd);
  if (stat(argv[1], &s2) != 0) return 1;
  int n = snprintf(buf, sizeof(buf), "%llu %llu\n",
                   (unsigned long long)s1.st_ino, (unsigned long long)s2.st_ino);
  int out = open(argv[2], O_WRONLY | O_CREAT | O_TRUNC, 0644);
  if (out < 0) return 1;
  write(out, buf, n);
  return 0;
}
"#,
            &binary,
        );
        let out = dir.path().join("out");
        let outcome = run_traced(&binary, &[&target, &out]);
        assert_eq!(outcome.exit_status, 0);
        assert_eq!(read_out(&out), "1 2\n");
        assert!(outcome.counters.injected_syscalls >= 1);
    }

    #[test]
    fn short_read_is_replayed_to_completion() {
        let _guard = TRACE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().expect("cannot create tempdir");
        let fifo = dir.path().join("fifo");
        mkfifo(&fifo, Mode::from_bits_truncate(0o644)).expect("cannot create fifo");
        let binary = dir.path().join("main");
        compile_executable(
            r#"
#include <fcntl.h>
#include <stdio.h>
#include <unistd.h>
int main(int argc, char **argv) {
  char buf[128];
  char out[32];
  int fd = open(argv[1], O_RDONLY);
  if (fd < 0) return 1;
  int n = read(fd, buf, 100);
  int m = snprintf(out, sizeof(out), "%d\n", n);
  int ofd = open(argv[2], O_WRONLY | O_CREAT | O_TRUNC, 0644);
  if (ofd < 0) return 1;
  write(ofd, out, m);
  return 0;
}
"#,
            &binary,
        );
        let out = dir.path().join("out");
        let writer_path = fifo.clone();
        let writer = std::thread::spawn(move || {
            let mut fifo = File::create(&writer_path).expect("cannot open fifo for writing");
            fifo.write_all(&[0xaa; 40]).expect("first chunk");
            fifo.flush().expect("flush");
            std::thread::sleep(Duration::from_millis(500));
            fifo.write_all(&[0xbb; 60]).expect("second chunk");
        });
        let outcome = run_traced(&binary, &[&fifo, &out]);
        writer.join().expect("writer thread");
        assert_eq!(outcome.exit_status, 0);
        assert_eq!(read_out(&out), "100\n");
        assert_eq!(outcome.counters.read_retries, 1);
        assert_eq!(outcome.counters.total_replays, 1);
    }

    #[test]
    fn getrandom_is_deterministic_across_runs_and_counted() {
        let _guard = TRACE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().expect("cannot create tempdir");
        let binary = dir.path().join("main");
        compile_executable(
            r#"
#include <sys/syscall.h>
#include <fcntl.h>
#include <stdio.h>
#include <unistd.h>
int main(int argc, char **argv) {
  unsigned char buf[16];
  char out[256];
  int off = 0;
  for (int round = 0; round < 2; round++) {
    long n = syscall(SYS_getrandom, buf, sizeof(buf), 0);
    if (n != (long)sizeof(buf)) return 1;
    for (unsigned i = 0; i < sizeof(buf); i++)
      off += snprintf(out + off, sizeof(out) - off, "%02x", buf[i]);
    out[off++] = '\n';
  }
  int fd = open(argv[1], O_WRONLY | O_CREAT | O_TRUNC, 0644);
  if (fd < 0) return 1;
  write(fd, out, off);
  return 0;
}
"#,
            &binary,
        );
        let out_first = dir.path().join("out1");
        let out_second = dir.path().join("out2");
        let first = run_traced(&binary, &[&out_first]);
        let second = run_traced(&binary, &[&out_second]);
        assert_eq!(first.exit_status, 0);
        assert_eq!(second.exit_status, 0);
        assert_eq!(first.counters.getrandom_calls, 2);
        assert_eq!(second.counters.getrandom_calls, 2);
        let first_bytes = read_out(&out_first);
        assert_eq!(first_bytes, read_out(&out_second));
        let mut lines = first_bytes.lines();
        let (a, b) = (lines.next().expect("line"), lines.next().expect("line"));
        assert_ne!(a, b, "the deterministic stream must still advance");
    }

    #[test]
    fn forked_child_shares_the_inode_registry() {
        let _guard = TRACE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().expect("cannot create tempdir");
        let target = dir.path().join("a");
        std::fs::write(&target, b"shared").expect("cannot create test file");
        let binary = dir.path().join("main");
        compile_executable(
            r#"
#include <sys/stat.h>
#include <sys/wait.h>
#include <fcntl.h>
#include <stdio.h>
#include <unistd.h>
int main(int argc, char **argv) {
  struct stat before;
  if (stat(argv[1], &before) != 0) return 1;
  pid_t pid = fork();
  if (pid == 0) {
    struct stat s;
    if (stat(argv[1], &s) != 0) _exit(1);
    char out[64];
    int n = snprintf(out, sizeof(out), "%llu\n", (unsigned long long)s.st_ino);
    int fd = open(argv[2], O_WRONLY | O_CREAT | O_TRUNC, 0644);
    if (fd < 0) _exit(1);
    write(fd, out, n);
    _exit(0);
  }
  int status = 0;
  if (waitpid(pid, &status, 0) != pid) return 1;
  return WIFEXITED(status) ? WEXITSTATUS(status) : 1;
}
"#,
            &binary,
        );
        let out = dir.path().join("out");
        let outcome = run_traced(&binary, &[&target, &out]);
        assert_eq!(outcome.exit_status, 0);
        assert_eq!(read_out(&out), "1\n");
    }

    #[test]
    fn getdents_order_is_stable_and_virtualized() {
        let _guard = TRACE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().expect("cannot create tempdir");
        let listing = dir.path().join("listing");
        std::fs::create_dir(&listing).expect("cannot create dir");
        for name in &["zeta", "alpha", "middle"] {
            std::fs::write(listing.join(name), b"x").expect("cannot create entry");
        }
        let binary = dir.path().join("main");
        compile_executable(
            r#"
#include <dirent.h>
#include <fcntl.h>
#include <stdio.h>
#include <string.h>
#include <unistd.h>
int main(int argc, char **argv) {
  char out[1024];
  int off = 0;
  DIR *d = opendir(argv[1]);
  if (!d) return 1;
  struct dirent *e;
  while ((e = readdir(d)) != NULL) {
    if (strcmp(e->d_name, ".") == 0 || strcmp(e->d_name, "..") == 0)
      continue;
    off += snprintf(out + off, sizeof(out) - off, "%s %llu\n", e->d_name,
                    (unsigned long long)e->d_ino);
  }
  closedir(d);
  int fd = open(argv[2], O_WRONLY | O_CREAT | O_TRUNC, 0644);
  if (fd < 0) return 1;
  write(fd, out, off);
  return 0;
}
"#,
            &binary,
        );
        let out = dir.path().join("out");
        let outcome = run_traced(&binary, &[&listing, &out]);
        assert_eq!(outcome.exit_status, 0);
        let body = read_out(&out);
        let names: Vec<&str> = body
            .lines()
            .map(|l| l.split_whitespace().next().expect("name"))
            .collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted, "entries must arrive name-sorted: {}", body);
    }

    #[test]
    fn exit_codes_and_signal_deaths_propagate() {
        let _guard = TRACE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().expect("cannot create tempdir");
        let binary = dir.path().join("main");
        compile_executable(
            r#"
#include <signal.h>
#include <stdlib.h>
#include <string.h>
#include <unistd.h>
int main(int argc, char **argv) {
  if (argc > 1 && strcmp(argv[1], "crash") == 0)
    kill(getpid(), SIGKILL);
  return 7;
}
"#,
            &binary,
        );
        let outcome = run_traced(&binary, &[]);
        assert_eq!(outcome.exit_status, 7);
        let crash = Path::new("crash");
        let outcome = run_traced(&binary, &[crash]);
        assert_eq!(outcome.exit_status, 128 + libc::SIGKILL);
    }
}
