//! Timeout sub-classification.
//!
//! When a deadline expires the runner samples the child *before* killing it
//! and feeds the sample into [`classify_timeout`]. The decision is a
//! heuristic, not an OS-level diagnosis:
//!
//! - `WaitingForInput` requires all of: the source contains an input-reading
//!   construct, every byte of the supplied stdin was delivered, and the child
//!   was sleeping with negligible CPU use at expiry.
//! - Everything else, including "no sample available", is `Busy`.
//!
//! Known false positive: a program that reads input and then sleeps is
//! reported as waiting for input. Known false negative: a program that polls
//! for input without any recognised construct is reported as busy.

use coach_common::types::TimeoutKind;
use std::time::Duration;

/// Source fragments that indicate the program reads standard input
pub const INPUT_CONSTRUCTS: &[&str] = &["input(", "sys.stdin", "fileinput"];

/// CPU time below this fraction of wall time counts as idle
pub const IDLE_CPU_RATIO: f64 = 0.10;

/// Whether the submitted source contains an input-reading construct
pub fn reads_input(code: &str) -> bool {
    INPUT_CONSTRUCTS.iter().any(|construct| code.contains(construct))
}

/// Scheduler state and CPU usage of a process at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    pub state: char,
    pub ppid: u32,
    pub cpu_seconds: f64,
}

impl ProcessSample {
    /// Interruptible or uninterruptible sleep
    pub fn is_sleeping(&self) -> bool {
        matches!(self.state, 'S' | 'D')
    }
}

/// Everything the policy looks at when a deadline expires
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutSignals {
    pub reads_input: bool,
    pub stdin_delivered: bool,
    pub sample: Option<ProcessSample>,
    pub elapsed: Duration,
}

pub fn classify_timeout(signals: &TimeoutSignals) -> TimeoutKind {
    let Some(sample) = signals.sample else {
        return TimeoutKind::Busy;
    };

    let cpu_budget = signals.elapsed.as_secs_f64() * IDLE_CPU_RATIO;
    let idle = sample.is_sleeping() && sample.cpu_seconds < cpu_budget;

    if idle && signals.stdin_delivered && signals.reads_input {
        TimeoutKind::WaitingForInput
    } else {
        TimeoutKind::Busy
    }
}

/// Sample a live process. Returns `None` where the platform offers no
/// cheap way to do so, or if the process is already gone.
#[cfg(target_os = "linux")]
pub fn sample_process(pid: u32) -> Option<ProcessSample> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_proc_stat(&stat, clock_ticks_per_second())
}

#[cfg(not(target_os = "linux"))]
pub fn sample_process(_pid: u32) -> Option<ProcessSample> {
    None
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_second() -> f64 {
    use nix::unistd::{sysconf, SysconfVar};

    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as f64,
        _ => 100.0,
    }
}

/// Parse `/proc/<pid>/stat`. The command name may contain spaces and
/// parentheses, so fields are counted from the last `)`.
pub fn parse_proc_stat(stat: &str, ticks_per_second: f64) -> Option<ProcessSample> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // fields[0] is field 3 (state), fields[1] the ppid; utime and stime
    // are fields 14 and 15
    let state = fields.first()?.chars().next()?;
    let ppid: u32 = fields.get(1)?.parse().ok()?;
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;

    Some(ProcessSample {
        state,
        ppid,
        cpu_seconds: (utime + stime) as f64 / ticks_per_second,
    })
}
