//! Standard-stream transport adapter (spec §4.2.a).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use gw_core::{GatewayError, McpMessage, TransportKind};
use gw_frame::{FrameEvent, FrameParser};
use gw_process::{spawn_stdio, terminate_gracefully, wait_for_stdout_ready, SpawnOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::{is_command_allowed, looks_like_missing_env_var, Adapter, AdapterEvent};

/// Forward one parsed frame event to the inbound-message channel and the
/// adapter event bus, shared by both the primed-initial-bytes pass and the
/// main stdout read loop.
fn emit(
    inbound_tx: &mpsc::UnboundedSender<McpMessage>,
    events_tx: &broadcast::Sender<AdapterEvent>,
    event: FrameEvent,
) {
    match event {
        FrameEvent::Value(value) => {
            if let Ok(message) = serde_json::from_value::<McpMessage>(value) {
                let _ = inbound_tx.send(message.clone());
                let _ = events_tx.send(AdapterEvent::Message(message));
            }
        }
        FrameEvent::Error { message, .. } => {
            let _ = events_tx.send(AdapterEvent::Error(message));
        }
        FrameEvent::BufferOverflow { budget } => {
            let _ = events_tx.send(AdapterEvent::Error(format!(
                "frame buffer overflow: exceeded {budget} bytes"
            )));
        }
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);
const FRAME_BYTE_BUDGET: usize = 16 * 1024 * 1024;

/// Where a stdio child's working directory is allowed to resolve to
/// (spec §4.2.a: "project root or, under portable-sandbox mode, inside the
/// designated sandbox/data roots").
#[derive(Debug, Clone, Default)]
pub struct ConfinementRoots {
    pub project_root: PathBuf,
    pub sandbox_roots: Vec<PathBuf>,
}

impl ConfinementRoots {
    fn contains(&self, candidate: &Path) -> bool {
        candidate.starts_with(&self.project_root)
            || self.sandbox_roots.iter().any(|r| candidate.starts_with(r))
    }
}

/// Bundled-runtime roots for portable-sandbox env construction
/// (spec §6 env vars).
#[derive(Debug, Clone, Default)]
pub struct PortableRuntimeRoots {
    pub node_dir: Option<String>,
    pub python_dir: Option<String>,
    pub go_dir: Option<String>,
    pub gopath: Option<String>,
    pub gobin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StdioAdapterConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub confinement: ConfinementRoots,
    pub runtime_roots: PortableRuntimeRoots,
    /// When portable-sandbox offline installation is enforced, the
    /// requested package must already exist under this directory.
    pub sandbox_packages_root: Option<PathBuf>,
    pub enforce_offline_install: bool,
}

pub struct StdioAdapter {
    config: StdioAdapterConfig,
    connected: bool,
    stdin: Option<ChildStdin>,
    events_tx: broadcast::Sender<AdapterEvent>,
    inbound_rx: Option<mpsc::UnboundedReceiver<McpMessage>>,
    reader_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
    child_handle: Option<(tokio::process::Child, u32)>,
}

impl StdioAdapter {
    pub fn new(config: StdioAdapterConfig) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            config,
            connected: false,
            stdin: None,
            events_tx,
            inbound_rx: None,
            reader_task: None,
            stderr_task: None,
            child_handle: None,
        }
    }

    fn validate_command(&self) -> Result<(), GatewayError> {
        if !is_command_allowed(&self.config.command) {
            return Err(GatewayError::CommandNotAllowed(self.config.command.clone()));
        }
        Ok(())
    }

    fn validate_working_dir(&self) -> Result<(), GatewayError> {
        let Some(dir) = &self.config.working_dir else {
            return Ok(());
        };
        let canonical = std::fs::canonicalize(dir)
            .map_err(|_| GatewayError::WorkingDirectoryOutsideRoot)?;
        if !self.config.confinement.contains(&canonical) {
            return Err(GatewayError::WorkingDirectoryOutsideRoot);
        }
        Ok(())
    }

    fn effective_env(&self) -> Result<HashMap<String, String>, GatewayError> {
        if self.config.env.get("SANDBOX").map(String::as_str) == Some("portable") {
            build_portable_env(&self.config)
        } else {
            Ok(self.config.env.clone())
        }
    }

    /// Spawn the stdout-framing and stderr-line reader tasks. `initial` is
    /// whatever bytes `wait_for_stdout_ready` already pulled off `stdout`
    /// during the connect-readiness probe — it must be fed to the parser
    /// before the main read loop, or the child's first frame loses its
    /// leading bytes.
    fn spawn_readers(&mut self, initial: Vec<u8>, stdout: ChildStdout, stderr: tokio::process::ChildStderr) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.inbound_rx = Some(inbound_rx);

        let events_tx = self.events_tx.clone();
        self.reader_task = Some(tokio::spawn(async move {
            let mut parser = FrameParser::new(FRAME_BYTE_BUDGET);
            let mut reader = stdout;
            let mut buf = [0u8; 4096];

            let dispatch = |parser: &mut FrameParser, chunk: &[u8]| -> Vec<FrameEvent> {
                parser.push(chunk).unwrap_or_default()
            };

            if !initial.is_empty() {
                for event in dispatch(&mut parser, &initial) {
                    emit(&inbound_tx, &events_tx, event);
                }
            }

            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => break,
                };
                for event in dispatch(&mut parser, &buf[..n]) {
                    emit(&inbound_tx, &events_tx, event);
                }
            }
            let _ = events_tx.send(AdapterEvent::Disconnect);
        }));

        let events_tx = self.events_tx.clone();
        self.stderr_task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let env_hint = looks_like_missing_env_var(&line);
                let _ = events_tx.send(AdapterEvent::Stderr { line, env_hint });
            }
        }));
    }
}

#[async_trait]
impl Adapter for StdioAdapter {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        self.validate_command()?;
        self.validate_working_dir()?;
        let env = self.effective_env()?;

        let opts = SpawnOptions {
            command: self.config.command.clone(),
            args: self.config.args.clone(),
            env,
            working_dir: self.config.working_dir.clone(),
            isolate_process_group: true,
        };

        let mut spawned = spawn_stdio(&opts)?;
        let mut stdout = spawned.child.stdout.take().expect("stdout piped");
        let stderr = spawned.child.stderr.take().expect("stderr piped");
        let stdin = spawned.child.stdin.take().expect("stdin piped");

        let initial = wait_for_stdout_ready(&mut stdout, CONNECT_TIMEOUT).await?;

        self.spawn_readers(initial, stdout, stderr);
        self.stdin = Some(stdin);
        self.child_handle = Some((spawned.child, spawned.pid));
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), GatewayError> {
        if let Some((mut child, pid)) = self.child_handle.take() {
            terminate_gracefully(&mut child, pid, true, DISCONNECT_GRACE).await?;
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.stdin = None;
        self.connected = false;
        let _ = self.events_tx.send(AdapterEvent::Disconnect);
        Ok(())
    }

    async fn send(&mut self, message: &McpMessage) -> Result<(), GatewayError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(GatewayError::NotConnected);
        };
        let mut line = serde_json::to_vec(message)
            .map_err(|e| GatewayError::MalformedMessage(e.to_string()))?;
        line.push(b'\n');
        stdin
            .write_all(&line)
            .await
            .map_err(|e| GatewayError::ConnectionFailed(e.to_string()))?;
        let _ = self.events_tx.send(AdapterEvent::Sent(message.clone()));
        Ok(())
    }

    async fn receive(&mut self) -> Result<McpMessage, GatewayError> {
        let Some(rx) = self.inbound_rx.as_mut() else {
            return Err(GatewayError::NotConnected);
        };
        rx.recv().await.ok_or(GatewayError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events_tx.subscribe()
    }

    fn pid(&self) -> Option<u32> {
        self.child_handle.as_ref().map(|(_, pid)| *pid)
    }
}

/// Construct the isolated portable-sandbox environment (spec §4.2.a).
///
/// Order: minimal OS-required vars, then bundled-runtime `PATH` prefix,
/// hardened package-manager flags, disabled proxy vars, user overrides
/// applied last so they always win.
fn build_portable_env(config: &StdioAdapterConfig) -> Result<HashMap<String, String>, GatewayError> {
    let mut env = HashMap::new();

    for key in ["PATH", "HOME", "LANG", "TERM", "TMPDIR"] {
        if let Ok(value) = std::env::var(key) {
            env.insert(key.to_string(), value);
        }
    }

    let mut prefix_dirs = Vec::new();
    if let Some(dir) = &config.runtime_roots.node_dir {
        prefix_dirs.push(format!("{dir}/bin"));
    }
    if let Some(dir) = &config.runtime_roots.python_dir {
        prefix_dirs.push(format!("{dir}/bin"));
    }
    if let Some(dir) = &config.runtime_roots.go_dir {
        prefix_dirs.push(format!("{dir}/bin"));
    }
    if !prefix_dirs.is_empty() {
        let existing = env.get("PATH").cloned().unwrap_or_default();
        env.insert("PATH".to_string(), format!("{}:{existing}", prefix_dirs.join(":")));
    }

    if let Some(gopath) = &config.runtime_roots.gopath {
        env.insert("GOPATH".to_string(), gopath.clone());
    }
    if let Some(gobin) = &config.runtime_roots.gobin {
        env.insert("GOBIN".to_string(), gobin.clone());
    }

    // Hardened package-manager flags: no scripts, no update notifiers.
    env.insert("NPM_CONFIG_IGNORE_SCRIPTS".to_string(), "true".to_string());
    env.insert("NPM_CONFIG_UPDATE_NOTIFIER".to_string(), "false".to_string());
    env.insert("PIP_NO_INPUT".to_string(), "1".to_string());
    env.insert("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string());

    // Disabled proxy variables: a sandboxed child should not inherit the
    // host's network proxy configuration.
    for key in ["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY", "http_proxy", "https_proxy"] {
        env.remove(key);
    }

    if config.enforce_offline_install {
        validate_offline_package(config)?;
    }

    // User overrides applied last.
    for (key, value) in &config.env {
        env.insert(key.clone(), value.clone());
    }

    Ok(env)
}

fn validate_offline_package(config: &StdioAdapterConfig) -> Result<(), GatewayError> {
    let Some(root) = &config.sandbox_packages_root else {
        return Err(GatewayError::OfflinePackageMissing {
            package: "<no sandbox packages root configured>".to_string(),
        });
    };
    let lock_file = root.join("package-lock.json");
    if !lock_file.exists() {
        return Err(GatewayError::OfflinePackageMissing {
            package: "<lock file missing>".to_string(),
        });
    }
    let Some(package) = config.args.iter().find(|a| !a.starts_with('-')) else {
        return Ok(());
    };
    let package_dir = root.join("node_modules").join(package);
    if !package_dir.exists() {
        return Err(GatewayError::OfflinePackageMissing {
            package: package.clone(),
        });
    }
    Ok(())
}
