//! Best-effort RSS monitoring for spawned children, used when the host has
//! no cgroup support (`SandboxCapability::Setrlimit`) and a memory cap is
//! still desired as a soft signal.

use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::sync::watch;

/// Polls `pid`'s resident set size every `interval` until `stop` fires,
/// reporting the most recent sample in bytes.
pub fn watch_rss(pid: u32, interval: Duration) -> (watch::Receiver<u64>, impl FnOnce()) {
    let (tx, rx) = watch::channel(0u64);
    let (stop_tx, mut stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut sys = System::new();
        let pid = Pid::from_u32(pid);
        loop {
            if *stop_rx.borrow() {
                break;
            }
            sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
            if let Some(proc_) = sys.process(pid) {
                let _ = tx.send(proc_.memory());
            } else {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop_rx.changed() => {}
            }
        }
    });

    let stop = move || {
        let _ = stop_tx.send(true);
    };
    (rx, stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_rss_reports_nonzero_for_running_process() {
        let pid = std::process::id();
        let (mut rx, stop) = watch_rss(pid, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sample = *rx.borrow_and_update();
        stop();
        assert!(sample > 0, "expected a non-zero RSS sample for our own pid");
    }
}
