use crate::pidtree;
use std::time::Duration;
use tokio::time::Instant;

/// Options for [`terminate_tree`].
#[derive(Debug, Clone)]
pub struct TerminateOpts {
    /// Overall confirmation budget after the signal ladder.
    pub timeout_ms: u64,
    /// Resolved leaf pid, when distinct from the root; confirmed dead and
    /// force-killed as part of the sweep if still alive.
    pub leaf_pid: Option<u32>,
}

impl Default for TerminateOpts {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            leaf_pid: None,
        }
    }
}

/// Whether `pid` still needs killing. Zombies count as dead - a spawned
/// child lingers in the table until reaped, and polling must not stall on
/// that.
fn pid_exists(pid: u32) -> bool {
    pidtree::is_alive(pid)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) {
    unsafe {
        // Process group first (negative pid), then the pid itself; the group
        // id may differ from the pid if setsid failed at spawn time.
        libc::kill(-(pid as i32), signal);
        libc::kill(pid as i32, signal);
    }
}

#[cfg(windows)]
async fn taskkill(pid: u32, force: bool) {
    let mut cmd = tokio::process::Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string(), "/T"]);
    if force {
        cmd.arg("/F");
    }
    let _ = cmd.output().await;
}

async fn wait_for_death(pid: u32, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    loop {
        if !pid_exists(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Drive a graduated shutdown of `pid` and its whole process tree.
///
/// POSIX: SIGINT, then SIGTERM, then SIGKILL, each sent to the process group
/// and the pid, returning as soon as the pid is confirmed gone. If the root
/// outlives all three signals, poll for up to `timeout_ms`, then kill direct
/// children individually before a final SIGKILL of the root. Windows swaps
/// the ladder for a gentle then forced recursive `taskkill` with the same
/// poll shape. After the root (and a distinct leaf pid) are dead, a final
/// sweep force-kills any still-living descendants - renderer and helper
/// subprocesses are not always parented directly under the root.
///
/// Idempotent and infallible: returns `false` if death could not be
/// confirmed within budget, never errors. Calling it on an already-dead pid
/// returns `true`.
pub async fn terminate_tree(pid: u32, opts: TerminateOpts) -> bool {
    // Descendants must be captured while the root is still alive; once it
    // dies the parent links are gone.
    let pre_kill_descendants = pidtree::descendant_pids(pid);

    if !pid_exists(pid) {
        sweep(&pre_kill_descendants, opts.leaf_pid).await;
        return true;
    }

    tracing::debug!(pid, timeout_ms = opts.timeout_ms, "terminating process tree");

    let mut root_dead = false;

    #[cfg(unix)]
    {
        for signal in [libc::SIGINT, libc::SIGTERM, libc::SIGKILL] {
            send_signal(pid, signal);
            if wait_for_death(pid, Duration::from_millis(400)).await {
                root_dead = true;
                break;
            }
        }
    }

    #[cfg(windows)]
    {
        taskkill(pid, false).await;
        if wait_for_death(pid, Duration::from_millis(400)).await {
            root_dead = true;
        } else {
            taskkill(pid, true).await;
            root_dead = wait_for_death(pid, Duration::from_millis(400)).await;
        }
    }

    if !root_dead {
        root_dead = wait_for_death(pid, Duration::from_millis(opts.timeout_ms)).await;
    }

    if !root_dead {
        // Last resort: take out direct children individually, then the root.
        for child in &pre_kill_descendants {
            force_kill(*child);
        }
        force_kill(pid);
        root_dead = wait_for_death(pid, Duration::from_millis(1_000)).await;
    }

    if !root_dead {
        tracing::warn!(pid, "process tree did not die within budget");
        return false;
    }

    sweep(&pre_kill_descendants, opts.leaf_pid).await;
    true
}

fn force_kill(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
    #[cfg(windows)]
    {
        use sysinfo::{Pid, System};
        let sys = System::new_all();
        if let Some(proc) = sys.process(Pid::from_u32(pid)) {
            proc.kill();
        }
    }
}

/// Force-kill stragglers from the captured tree plus the leaf pid.
async fn sweep(descendants: &[u32], leaf_pid: Option<u32>) {
    let mut targets: Vec<u32> = descendants.to_vec();
    if let Some(leaf) = leaf_pid {
        if !targets.contains(&leaf) {
            targets.push(leaf);
        }
    }
    for pid in targets {
        if pid_exists(pid) {
            tracing::debug!(pid, "sweeping straggler");
            force_kill(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_live_process_returns_true() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        assert!(terminate_tree(pid, TerminateOpts::default()).await);
        assert!(!pidtree::is_alive(pid));
    }

    #[tokio::test]
    async fn test_terminate_dead_pid_is_idempotent() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        let _ = child.wait().await;

        // Twice on an already-dead pid: still true, never errors.
        assert!(terminate_tree(pid, TerminateOpts::default()).await);
        assert!(terminate_tree(pid, TerminateOpts::default()).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_descendants() {
        // sh spawns a sleeping grandchild; both must be gone afterward.
        let child = tokio::process::Command::new("sh")
            .args(["-c", "sleep 30 & wait"])
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let kids = pidtree::descendant_pids(pid);
        assert!(terminate_tree(pid, TerminateOpts::default()).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        for kid in kids {
            assert!(!pidtree::is_alive(kid), "descendant {} survived", kid);
        }
    }
}
