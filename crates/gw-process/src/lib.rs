//! Sandboxed child-process primitives consumed by the stdio and container
//! transport adapters.

pub mod capability;
pub mod monitor;
pub mod spawn;

pub use capability::{detect_sandbox_capability, SandboxCapability};
pub use spawn::{
    locate_container_runtime, runtime_binary_exists, spawn_stdio, terminate_gracefully,
    wait_for_stdout_ready, SpawnOptions, SpawnedChild,
};
