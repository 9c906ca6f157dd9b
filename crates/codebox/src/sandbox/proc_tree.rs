//! Process tree tracking through procfs
//!
//! A program can leave its process group with `setsid` or `setpgid`, so a
//! group kill does not reach everything it started. Members are followed by
//! parent pid instead, and identified by pid plus start time so a recycled
//! pid is never mistaken for one of them.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::{Pid, SysconfVar, sysconf};
use tracing::{debug, warn};

/// Upper bound on stop and kill rounds, so a fork bomb cannot keep a sweep alive
const MAX_SWEEPS: usize = 200;

/// Fields of `/proc/<pid>/stat` used for tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProcStat {
    pub pid: i32,
    pub ppid: i32,
    pub state: char,
    /// User plus system time in clock ticks
    pub cpu_ticks: u64,
    pub start_time: u64,
}

impl ProcStat {
    /// Parse a stat line; the command name may itself contain spaces and parentheses
    pub(crate) fn parse(line: &str) -> Option<Self> {
        let (head, rest) = line.rsplit_once(')')?;
        let pid = head.split_once('(')?.0.trim().parse().ok()?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let number = |index: usize| fields.get(index)?.parse::<u64>().ok();

        Some(Self {
            pid,
            state: fields.first()?.chars().next()?,
            ppid: fields.get(1)?.parse().ok()?,
            cpu_ticks: number(11)? + number(12)?,
            start_time: number(19)?,
        })
    }

    fn read(pid: i32) -> Option<Self> {
        let line = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        Self::parse(&line)
    }

    fn is_dead(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }

    fn is_stopped(&self) -> bool {
        matches!(self.state, 'T' | 't')
    }
}

fn snapshot() -> Vec<ProcStat> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter_map(ProcStat::read)
        .collect()
}

fn clock_ticks_per_second() -> u64 {
    sysconf(SysconfVar::CLK_TCK)
        .ok()
        .flatten()
        .and_then(|ticks| u64::try_from(ticks).ok())
        .filter(|&ticks| ticks > 0)
        .unwrap_or(100)
}

fn send(pid: i32, signal: Signal) {
    if pid <= 0 {
        return;
    }
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, ?signal, error = %e, "failed to signal process"),
    }
}

/// Every process seen in a spawned program's tree
///
/// The program runs as a child subreaper, so descendants orphaned while it
/// lives are reparented to it and stay reachable from the root. Dropping the
/// tree kills whatever is left of it.
#[derive(Debug)]
pub(crate) struct ProcessTree {
    root: Option<i32>,
    members: HashMap<i32, u64>,
    root_cpu_ticks: u64,
}

impl ProcessTree {
    pub(crate) fn new(pid: Option<u32>) -> Self {
        let root = pid.and_then(|pid| i32::try_from(pid).ok()).filter(|&pid| pid > 0);
        let mut tree = Self {
            root,
            members: HashMap::new(),
            root_cpu_ticks: 0,
        };
        if let Some(stat) = root.and_then(ProcStat::read) {
            tree.members.insert(stat.pid, stat.start_time);
            tree.root_cpu_ticks = stat.cpu_ticks;
        }
        tree
    }

    /// Record any descendants that appeared since the last look
    pub(crate) fn observe(&mut self) {
        self.collect(&snapshot());
    }

    /// CPU time of the root process as last observed
    pub(crate) fn root_cpu_time(&self) -> Duration {
        Duration::from_secs_f64(self.root_cpu_ticks as f64 / clock_ticks_per_second() as f64)
    }

    /// Live members present in `table`, adopting their descendants as members
    fn collect(&mut self, table: &[ProcStat]) -> Vec<ProcStat> {
        let mut live: Vec<ProcStat> = table
            .iter()
            .filter(|stat| self.members.get(&stat.pid) == Some(&stat.start_time))
            .copied()
            .collect();

        let mut frontier: Vec<i32> = live.iter().map(|stat| stat.pid).collect();
        while let Some(parent) = frontier.pop() {
            for child in table.iter().filter(|stat| stat.ppid == parent) {
                if self.members.insert(child.pid, child.start_time) != Some(child.start_time) {
                    live.push(*child);
                    frontier.push(child.pid);
                }
            }
        }

        if let Some(root) = self.root
            && let Some(stat) = live.iter().find(|stat| stat.pid == root)
        {
            self.root_cpu_ticks = stat.cpu_ticks;
        }

        let present: HashSet<i32> = table.iter().map(|stat| stat.pid).collect();
        self.members.retain(|pid, _| present.contains(pid));
        live.retain(|stat| !stat.is_dead());
        live
    }

    /// Kill every process in the tree and the root's process group
    ///
    /// Members are stopped first: a stopped process cannot fork, so the set
    /// stops growing and the kill round cannot miss a late child.
    pub(crate) fn kill(&mut self) {
        for _ in 0..MAX_SWEEPS {
            let running: Vec<ProcStat> = self
                .collect(&snapshot())
                .into_iter()
                .filter(|stat| !stat.is_stopped())
                .collect();
            if running.is_empty() {
                break;
            }
            for stat in running {
                send(stat.pid, Signal::SIGSTOP);
            }
            std::thread::yield_now();
        }

        let mut killed = 0usize;
        let mut cleared = false;
        for _ in 0..MAX_SWEEPS {
            let live = self.collect(&snapshot());
            if live.is_empty() {
                cleared = true;
                break;
            }
            killed = killed.max(live.len());
            for stat in live {
                send(stat.pid, Signal::SIGKILL);
            }
            std::thread::yield_now();
        }
        if !cleared {
            warn!(root = self.root, "process tree still alive after the final sweep");
        }

        if let Some(root) = self.root {
            match killpg(Pid::from_raw(root), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pgid = root, error = %e, "failed to kill process group"),
            }
        }
        if killed > 0 {
            debug!(root = self.root, killed, "process tree killed");
        }
    }
}

impl Drop for ProcessTree {
    fn drop(&mut self) {
        self.kill();
    }
}
