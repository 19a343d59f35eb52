//! Finding every process a sandbox run started.
//!
//! The process group covers ordinary children, but a program can leave it
//! with `os.setsid()` or `start_new_session=True`. Two links survive that:
//! parent links back to the leader while the leader is still unreaped, and a
//! per-run marker variable that descendants inherit through their
//! environment even after being re-parented.

use std::collections::{HashMap, HashSet};

/// Environment variable carrying the per-run marker
pub const SANDBOX_MARKER_VAR: &str = "CODECOACH_SANDBOX_ID";

/// Every pid reachable from `root` through `(pid, ppid)` links, `root` excluded
pub fn descendants(root: u32, links: &[(u32, u32)]) -> HashSet<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, ppid) in links {
        children.entry(ppid).or_default().push(pid);
    }

    let mut found = HashSet::new();
    let mut pending = vec![root];
    while let Some(parent) = pending.pop() {
        for &child in children.get(&parent).into_iter().flatten() {
            if child != root && found.insert(child) {
                pending.push(child);
            }
        }
    }
    found
}

/// Whether a NUL-separated environment block carries `marker`
pub fn environ_has_marker(environ: &[u8], marker: &str) -> bool {
    let wanted = format!("{}={}", SANDBOX_MARKER_VAR, marker);
    environ
        .split(|byte| *byte == 0)
        .any(|entry| entry == wanted.as_bytes())
}

/// Processes belonging to one sandbox run.
///
/// `leader` is followed through parent links only while it has not been
/// reaped; after that its pid may belong to someone else.
#[cfg(target_os = "linux")]
pub fn sandbox_processes(leader: Option<u32>, marker: &str) -> HashSet<u32> {
    use crate::probe;

    let own = std::process::id();
    let pids = list_pids();
    let mut found = HashSet::new();

    if let Some(leader) = leader {
        let links: Vec<(u32, u32)> = pids
            .iter()
            .filter_map(|&pid| probe::sample_process(pid).map(|sample| (pid, sample.ppid)))
            .collect();
        found.extend(descendants(leader, &links));
    }

    for &pid in &pids {
        if pid == own || found.contains(&pid) {
            continue;
        }
        // Other users' processes are unreadable, and never ours anyway
        if let Ok(environ) = std::fs::read(format!("/proc/{}/environ", pid)) {
            if environ_has_marker(&environ, marker) {
                found.insert(pid);
            }
        }
    }

    found.remove(&own);
    found
}

#[cfg(not(target_os = "linux"))]
pub fn sandbox_processes(_leader: Option<u32>, _marker: &str) -> HashSet<u32> {
    HashSet::new()
}

#[cfg(target_os = "linux")]
fn list_pids() -> Vec<u32> {
    match std::fs::read_dir("/proc") {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list /proc");
            Vec::new()
        }
    }
}
