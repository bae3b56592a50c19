use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use sysinfo::{Pid, System};

/// One row of a process-table snapshot.
///
/// Leaf-pid scoring works over these records rather than the live OS table
/// so the selection logic is testable against synthetic trees.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub cmd: Vec<String>,
}

lazy_static! {
    // Binary names the framework commonly execs into.
    static ref APP_BINARY: Regex = Regex::new(r"(?i)(electron|chromium|chrome|app)$").unwrap();
    // Helper/renderer subprocess markers; these are never the leaf.
    static ref HELPER: Regex = Regex::new(
        r"(?i)(--type=(renderer|gpu-process|utility|zygote|broker)|helper|crashpad|zygote)"
    )
    .unwrap();
}

const SCORE_EXACT: i32 = 100;
const SCORE_APP_PATTERN: i32 = 50;
const SCORE_HELPER: i32 = 10;

/// Snapshot the live process table into records.
pub fn snapshot() -> Vec<ProcessRecord> {
    let sys = System::new_all();
    sys.processes()
        .iter()
        .map(|(pid, proc)| ProcessRecord {
            pid: pid.as_u32(),
            parent: proc.parent().map(|p| p.as_u32()),
            name: proc.name().to_string(),
            cmd: proc.cmd().to_vec(),
        })
        .collect()
}

/// All descendants of `root` (recursive parent/child walk), with their depth
/// below the root. The root itself is not included.
pub fn descendants(records: &[ProcessRecord], root: u32) -> Vec<(ProcessRecord, u32)> {
    let mut children: HashMap<u32, Vec<&ProcessRecord>> = HashMap::new();
    for record in records {
        if let Some(parent) = record.parent {
            children.entry(parent).or_default().push(record);
        }
    }

    let mut out = Vec::new();
    // Pid reuse between refreshes can leave parent-link cycles in a
    // snapshot; each pid is visited once so the walk always terminates.
    let mut visited: HashSet<u32> = HashSet::from([root]);
    let mut frontier = vec![(root, 0u32)];
    while let Some((pid, depth)) = frontier.pop() {
        if let Some(kids) = children.get(&pid) {
            for kid in kids {
                if !visited.insert(kid.pid) {
                    continue;
                }
                out.push(((*kid).clone(), depth + 1));
                frontier.push((kid.pid, depth + 1));
            }
        }
    }
    out
}

/// Live descendant pids of `root`.
pub fn descendant_pids(root: u32) -> Vec<u32> {
    descendants(&snapshot(), root)
        .into_iter()
        .map(|(record, _)| record.pid)
        .collect()
}

fn score_record(record: &ProcessRecord, target_basename: &str) -> i32 {
    let joined = record.cmd.join(" ");
    let exe_basename = record
        .cmd
        .first()
        .map(|argv0| {
            Path::new(argv0)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| argv0.clone())
        })
        .unwrap_or_else(|| record.name.clone());

    if HELPER.is_match(&joined) || HELPER.is_match(&record.name) {
        return SCORE_HELPER;
    }
    if exe_basename == target_basename || record.name == target_basename {
        return SCORE_EXACT;
    }
    if APP_BINARY.is_match(&exe_basename) {
        return SCORE_APP_PATTERN;
    }
    0
}

/// Resolve the pid of the actual long-lived target binary under `root`.
///
/// Scores every descendant's command line against the launched binary's
/// basename: exact match highest, known app binary names next, helper
/// naming patterns lowest. Highest score wins; ties break to the shallowest
/// tree depth, then the lowest pid. With no scoring descendant the root pid
/// is returned - some launch commands exec directly into the target binary
/// and leave no distinguishable descendant.
pub fn resolve_leaf_pid_in(records: &[ProcessRecord], root: u32, launched_binary: &Path) -> u32 {
    let target = launched_binary
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut best: Option<(i32, u32, u32)> = None; // (score, depth, pid)
    for (record, depth) in descendants(records, root) {
        let score = score_record(&record, &target);
        if score == 0 {
            continue;
        }
        let candidate = (score, depth, record.pid);
        best = Some(match best {
            None => candidate,
            Some(current) => {
                // Higher score wins; then shallower; then lower pid.
                let (cs, cd, cp) = current;
                let (ns, nd, np) = candidate;
                if ns > cs || (ns == cs && (nd < cd || (nd == cd && np < cp))) {
                    candidate
                } else {
                    current
                }
            }
        });
    }

    match best {
        Some((score, depth, pid)) => {
            tracing::debug!(pid, score, depth, "resolved leaf pid");
            pid
        }
        None => {
            tracing::debug!(root, "no matching descendant, using root as leaf");
            root
        }
    }
}

/// Resolve the leaf pid against the live process table.
pub fn resolve_leaf_pid(root: u32, launched_binary: &Path) -> u32 {
    resolve_leaf_pid_in(&snapshot(), root, launched_binary)
}

/// Whether `pid` is alive. Zombies count as dead: the process has exited
/// and only awaits reaping, which matters when confirming termination of a
/// direct child before it has been waited on.
pub fn is_alive(pid: u32) -> bool {
    let mut sys = System::new();
    let target = Pid::from_u32(pid);
    if !sys.refresh_process(target) {
        return false;
    }
    match sys.process(target) {
        Some(proc) => !matches!(
            proc.status(),
            sysinfo::ProcessStatus::Zombie | sysinfo::ProcessStatus::Dead
        ),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(pid: u32, parent: Option<u32>, name: &str, cmd: &[&str]) -> ProcessRecord {
        ProcessRecord {
            pid,
            parent,
            name: name.to_string(),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_descendants_walks_recursively() {
        let records = vec![
            record(1, None, "init", &["init"]),
            record(10, Some(1), "sh", &["sh"]),
            record(20, Some(10), "node", &["node"]),
            record(30, Some(20), "worker", &["worker"]),
            record(99, Some(1), "unrelated", &["unrelated"]),
        ];
        let mut pids: Vec<u32> = descendants(&records, 10).iter().map(|(r, _)| r.pid).collect();
        pids.sort();
        assert_eq!(pids, vec![20, 30]);
    }

    #[test]
    fn test_cyclic_parent_links_terminate() {
        // Two pids pointing at each other as parents: the walk must end
        // and report each pid at most once.
        let records = vec![
            record(10, Some(20), "a", &["a"]),
            record(20, Some(10), "b", &["b"]),
        ];
        let pids: Vec<u32> = descendants(&records, 10).iter().map(|(r, _)| r.pid).collect();
        assert_eq!(pids, vec![20]);
    }

    #[test]
    fn test_exact_match_descendant_wins() {
        let records = vec![
            record(100, None, "npx", &["npx", "myapp"]),
            record(101, Some(100), "sh", &["/bin/sh", "-c", "run"]),
            record(102, Some(101), "myapp", &["/opt/myapp/myapp", "--flag"]),
            record(103, Some(102), "myapp", &["/opt/myapp/myapp", "--type=renderer"]),
            record(104, Some(101), "grep", &["grep", "x"]),
        ];
        let leaf = resolve_leaf_pid_in(&records, 100, &PathBuf::from("/opt/myapp/myapp"));
        assert_eq!(leaf, 102);
    }

    #[test]
    fn test_helper_processes_score_below_app_pattern() {
        let records = vec![
            record(1, None, "launcher", &["launcher"]),
            record(2, Some(1), "electron", &["/usr/lib/app/electron", "."]),
            record(3, Some(2), "electron", &["/usr/lib/app/electron", "--type=gpu-process"]),
            record(4, Some(2), "chrome_crashpad", &["chrome_crashpad_handler"]),
        ];
        let leaf = resolve_leaf_pid_in(&records, 1, &PathBuf::from("/usr/bin/npx"));
        assert_eq!(leaf, 2);
    }

    #[test]
    fn test_no_match_falls_back_to_root() {
        let records = vec![
            record(50, None, "myapp", &["myapp"]),
            record(51, Some(50), "tail", &["tail", "-f", "log"]),
        ];
        let leaf = resolve_leaf_pid_in(&records, 50, &PathBuf::from("/opt/other/binary"));
        assert_eq!(leaf, 50);
    }

    #[test]
    fn test_tie_breaks_to_shallowest_then_lowest_pid() {
        let records = vec![
            record(1, None, "sh", &["sh"]),
            record(5, Some(1), "app", &["/x/app"]),
            record(3, Some(5), "app", &["/x/app"]),
            record(4, Some(1), "app", &["/x/app"]),
        ];
        // 5 and 4 are both depth 1 with the same score; lowest pid wins.
        let leaf = resolve_leaf_pid_in(&records, 1, &PathBuf::from("/x/app"));
        assert_eq!(leaf, 4);
    }
}
