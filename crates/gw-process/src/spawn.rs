//! Child process spawning and lifecycle primitives consumed by the stdio
//! and container transport adapters (spec §4.2.a, §4.2.b).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use std::pin::Pin;
use std::task::Poll;

use gw_core::GatewayError;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, Command};
use tokio::time::timeout;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Options for spawning a downstream service's child process.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    /// Isolate the child into its own process group so a hard-kill can
    /// target the whole group, not just the immediate child (spec §4.2.a
    /// lifecycle: graceful terminate, then hard-kill after 5s).
    pub isolate_process_group: bool,
}

/// A spawned child with stdio piped for the frame parser / newline-JSON
/// writer.
pub struct SpawnedChild {
    pub child: Child,
    pub pid: u32,
}

/// Spawn `opts.command` with stdin/stdout/stderr piped. Does not perform
/// any command allow-list or working-directory checks — those are the
/// adapter's responsibility (spec §4.2.a invariants), enforced before this
/// is called.
pub fn spawn_stdio(opts: &SpawnOptions) -> Result<SpawnedChild, GatewayError> {
    let mut cmd = Command::new(&opts.command);
    cmd.args(&opts.args)
        .env_clear()
        .envs(&opts.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &opts.working_dir {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    if opts.isolate_process_group {
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let child = cmd
        .spawn()
        .map_err(|e| GatewayError::ConnectionFailed(format!("spawn '{}' failed: {e}", opts.command)))?;
    let pid = child
        .id()
        .ok_or_else(|| GatewayError::ConnectionFailed("child exited before pid was available".into()))?;

    Ok(SpawnedChild { child, pid })
}

/// Confirm the child is still alive on stdout without blocking for output
/// it may never send (spec §4.2.a: "`connect` waits up to 10 s for the
/// child to present stdout"). A single non-blocking poll: any bytes already
/// buffered are returned so the caller can forward them into its frame
/// parser instead of losing them, `Pending` (nothing buffered, pipe still
/// open) counts as ready since most MCP servers are request/response and
/// write nothing until spoken to, and only an immediate EOF or read error
/// is treated as failure.
pub async fn wait_for_stdout_ready(
    stdout: &mut (impl AsyncRead + Unpin),
    deadline: Duration,
) -> Result<Vec<u8>, GatewayError> {
    let mut buf = [0u8; 4096];
    let poll_once = std::future::poll_fn(|cx| {
        let mut read_buf = ReadBuf::new(&mut buf);
        match Pin::new(&mut *stdout).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Ready(Ok(None)),
            Poll::Ready(Ok(())) => Poll::Ready(Ok(Some(read_buf.filled().len()))),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
        }
    });

    match timeout(deadline, poll_once).await {
        Ok(Ok(Some(0))) => Err(GatewayError::ConnectionFailed(
            "child closed stdout before any output".into(),
        )),
        Ok(Ok(Some(n))) => Ok(buf[..n].to_vec()),
        Ok(Ok(None)) => Ok(Vec::new()),
        Ok(Err(e)) => Err(GatewayError::ConnectionFailed(format!("stdout read failed: {e}"))),
        Err(_) => Err(GatewayError::ConnectionFailed(format!(
            "child did not produce stdout within {deadline:?}"
        ))),
    }
}

/// Graceful-then-hard-kill shutdown (spec §4.2.a / §4.3: 5 s grace before
/// force-kill). Targets the process group when `isolate_process_group` was
/// set at spawn time, so orphaned grandchildren die too.
pub async fn terminate_gracefully(
    child: &mut Child,
    pid: u32,
    process_group: bool,
    grace: Duration,
) -> Result<(), GatewayError> {
    #[cfg(unix)]
    {
        let target = if process_group { -(pid as i32) } else { pid as i32 };
        unsafe {
            libc::kill(target, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if timeout(grace, child.wait()).await.is_ok() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        let target = if process_group { -(pid as i32) } else { pid as i32 };
        unsafe {
            libc::kill(target, libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
    Ok(())
}

/// Locate a container runtime binary, preferring `docker` unless
/// `CONTAINER_RUNTIME=podman` is set (spec §6 env vars).
pub fn locate_container_runtime(preferred: Option<&str>) -> Option<String> {
    let candidates: &[&str] = match preferred {
        Some("podman") => &["podman", "docker"],
        _ => &["docker", "podman"],
    };
    candidates
        .iter()
        .find_map(|bin| which::which(bin).ok().map(|_| bin.to_string()))
}

/// Whether exactly `name` (not a fallback sibling) is on `PATH`, used by the
/// container adapter to decide whether a `docker`-run failure has a real
/// `podman` retry target.
pub fn runtime_binary_exists(name: &str) -> bool {
    which::which(name).is_ok()
}
