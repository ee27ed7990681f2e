use std::collections::{HashMap, HashSet};

use log::warn;
use nix::unistd::Pid;

use crate::mapper::ValueMapper;

/// Starting value of the logical clock. Well in the past of any real
/// filesystem timestamp the tracee can observe, so virtualized files never
/// appear to come from the future.
pub const CLOCK_EPOCH: u64 = 744_847_200;

/// First virtual inode handed out by the inode mapper.
pub const INODE_BASE: u64 = 1;

const RNG_SEED: u64 = 0x853c_49e6_748f_ea9b;

/// Event totals for one run, all ticked from the supervisor thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventCounters {
    pub read_retries: u32,
    pub write_retries: u32,
    pub getrandom_calls: u32,
    pub dev_urandom_opens: u32,
    pub dev_random_opens: u32,
    pub time_calls: u32,
    pub replays_due_to_blocking: u32,
    pub total_replays: u32,
    pub injected_syscalls: u32,
}

/// Deterministic byte source backing the virtualized getrandom. xorshift64*
/// with a fixed seed: the same run always sees the same stream.
pub struct DetRng {
    state: u64,
}

impl DetRng {
    fn new(seed: u64) -> DetRng {
        DetRng { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let word = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// State shared by every tracee in the process tree: the virtualization
/// registries, the logical clock, thread bookkeeping and the event counters.
/// Only the supervisor thread mutates it.
pub struct GlobalState {
    /// Isomorphism between kernel inodes and the inodes the tracee sees.
    pub inode_map: ValueMapper,
    /// Kernel inode -> virtual modification time (logical clock at first
    /// observation).
    pub mtime_map: ValueMapper,
    pub counters: EventCounters,
    pub rng: DetRng,
    clock: u64,
    live_threads: HashSet<Pid>,
    thread_groups: HashMap<Pid, HashSet<Pid>>,
    thread_group_of: HashMap<Pid, Pid>,
}

impl GlobalState {
    pub fn new() -> GlobalState {
        GlobalState {
            inode_map: ValueMapper::new("inode", INODE_BASE),
            mtime_map: ValueMapper::new("mtime", CLOCK_EPOCH),
            counters: EventCounters::default(),
            rng: DetRng::new(RNG_SEED),
            clock: CLOCK_EPOCH,
            live_threads: HashSet::new(),
            thread_groups: HashMap::new(),
            thread_group_of: HashMap::new(),
        }
    }

    pub fn logical_time(&self) -> u64 {
        self.clock
    }

    /// Advance the clock. Called once per time-observing syscall, nowhere
    /// else.
    pub fn increment_time(&mut self) {
        self.clock += 1;
    }

    /// Virtual mtime for `real_inode`, pinned to the current logical clock on
    /// first observation and stable afterwards.
    pub fn observe_mtime(&mut self, real_inode: u64) -> u64 {
        match self.mtime_map.get_virtual(real_inode) {
            Some(mtime) => mtime,
            None => {
                let mtime = self.clock;
                self.mtime_map.insert_pair(real_inode, mtime);
                mtime
            }
        }
    }

    pub fn add_thread(&mut self, pid: Pid) {
        self.live_threads.insert(pid);
    }

    /// Returns true when this was the last live thread.
    pub fn remove_thread(&mut self, pid: Pid) -> bool {
        self.live_threads.remove(&pid);
        self.live_threads.is_empty()
    }

    pub fn is_live(&self, pid: Pid) -> bool {
        self.live_threads.contains(&pid)
    }

    pub fn live_thread_count(&self) -> usize {
        self.live_threads.len()
    }

    /// Record `member` as part of `group`. The group key is the pid of the
    /// process itself, so the (k, k) edge appears when the process registers.
    pub fn add_thread_group_member(&mut self, group: Pid, member: Pid) {
        self.thread_groups.entry(group).or_default().insert(member);
        self.thread_group_of.insert(member, group);
    }

    /// Drop `member` from its group, erasing the group once empty. Keeps the
    /// reverse index in lockstep.
    pub fn remove_thread_group_member(&mut self, member: Pid) {
        let group = match self.thread_group_of.remove(&member) {
            Some(group) => group,
            None => return,
        };
        let members = match self.thread_groups.get_mut(&group) {
            Some(members) => members,
            None => {
                warn!("thread group {} lost its member set", group);
                return;
            }
        };
        members.remove(&member);
        if members.is_empty() {
            self.thread_groups.remove(&group);
        }
    }

    pub fn thread_group_of(&self, member: Pid) -> Option<Pid> {
        self.thread_group_of.get(&member).copied()
    }

    #[cfg(test)]
    fn thread_groups_consistent(&self) -> bool {
        let forward = self
            .thread_groups
            .iter()
            .all(|(group, members)| members.iter().all(|m| self.thread_group_of.get(m) == Some(group)));
        let backward = self
            .thread_group_of
            .iter()
            .all(|(member, group)| self.thread_groups.get(group).map_or(false, |ms| ms.contains(member)));
        forward && backward
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        GlobalState::new()
    }
}
