//! Builds the right transport adapter for a template's `transport` kind
//! (spec §4.2). Kept here, not in `gw-supervisor`, per that crate's
//! "adapter construction is the registry's job" split — the supervisor
//! stays testable against stub adapters.

use std::time::Duration;

use gw_core::{GatewayError, ServiceTemplate, TransportKind};
use gw_transport::container::{ContainerAdapter, ContainerAdapterConfig, ContainerRuntimeDefaults};
use gw_transport::http::{parse_http_headers, resolve_base_url, HttpAdapter, HttpAdapterConfig};
use gw_transport::stdio::{ConfinementRoots, PortableRuntimeRoots, StdioAdapter, StdioAdapterConfig};
use gw_transport::streamable_http::StreamableHttpAdapter;
use gw_transport::Adapter;

/// Deployment-wide defaults the factory falls back to when a template
/// itself doesn't pin them (working-directory confinement, portable
/// runtime roots, container policy defaults).
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub confinement: ConfinementRoots,
    pub runtime_roots: PortableRuntimeRoots,
    pub container_defaults: ContainerRuntimeDefaults,
    pub sandbox_packages_root: Option<std::path::PathBuf>,
    pub enforce_offline_install: bool,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            confinement: ConfinementRoots::default(),
            runtime_roots: PortableRuntimeRoots::default(),
            container_defaults: ContainerRuntimeDefaults {
                network: "none".to_string(),
                read_only: true,
                allowed_volume_roots: Vec::new(),
                env_prefix_allowlist: Vec::new(),
                preferred_runtime: None,
            },
            sandbox_packages_root: None,
            enforce_offline_install: false,
        }
    }
}

/// Construct the `Adapter` implementation named by `template.transport`,
/// pulling the transport-specific fields out of the template's
/// `command`/`args`/`env`/`container`/`url` (spec §4.2).
pub fn build_adapter(template: &ServiceTemplate, runtime: &RuntimeContext) -> Result<Box<dyn Adapter>, GatewayError> {
    match template.transport {
        TransportKind::Stdio => {
            let command = template
                .command
                .clone()
                .ok_or_else(|| GatewayError::PolicyViolation("stdio template has no command".to_string()))?;
            Ok(Box::new(StdioAdapter::new(StdioAdapterConfig {
                command,
                args: template.args.clone(),
                env: template.env.clone(),
                working_dir: template.working_dir.clone(),
                confinement: runtime.confinement.clone(),
                runtime_roots: runtime.runtime_roots.clone(),
                sandbox_packages_root: runtime.sandbox_packages_root.clone(),
                enforce_offline_install: runtime.enforce_offline_install,
            })))
        }
        TransportKind::Container => {
            let spec = template
                .container
                .clone()
                .ok_or_else(|| GatewayError::PolicyViolation("container template has no container spec".to_string()))?;
            let adapter = ContainerAdapter::new(ContainerAdapterConfig {
                spec,
                defaults: runtime.container_defaults.clone(),
                env: template.env.clone(),
                confinement: runtime.confinement.clone(),
                runtime_roots: runtime.runtime_roots.clone(),
            })?;
            Ok(Box::new(adapter))
        }
        TransportKind::Http | TransportKind::StreamableHttp => {
            let base_url = resolve_base_url(&template.env, template.command.as_deref())
                .or_else(|e| template.url.clone().ok_or(e))?;
            let headers = match template.env.get("HTTP_HEADERS") {
                Some(raw) => parse_http_headers(raw)?,
                None => Default::default(),
            };
            let config = HttpAdapterConfig {
                base_url,
                headers,
                request_timeout: template.timeouts.request_secs.map(Duration::from_secs),
                allow_insecure: false,
            };
            if template.transport == TransportKind::Http {
                Ok(Box::new(HttpAdapter::new(config)))
            } else {
                Ok(Box::new(StreamableHttpAdapter::new(config)))
            }
        }
    }
}
