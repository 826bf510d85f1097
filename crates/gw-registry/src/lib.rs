//! Service registry: templates, instantiated services, health aggregates
//! (spec §3, overview bullet "Service registry").
//!
//! Holds `ServiceTemplate` registrations; instance bookkeeping is delegated
//! to a `Supervisor`, which remains the exclusive owner of each
//! `ServiceInstance`'s lifetime (spec §3 Ownership). The registry never
//! mutates a template in place while a derived instance is running — it
//! replaces the map entry atomically on re-registration.

pub mod adapter;

use std::collections::HashMap;
use std::sync::Arc;

use gw_core::{GatewayError, InstanceState, ServiceInstance, ServiceTemplate};
use gw_supervisor::Supervisor;
use tokio::sync::RwLock;

pub use adapter::{build_adapter, RuntimeContext};

/// Aggregate health for one template family, derived from its live
/// instances (consumed by the router's selector, spec §4.6).
#[derive(Debug, Clone, Default)]
pub struct TemplateHealth {
    pub total_instances: usize,
    pub running_instances: usize,
    pub error_instances: usize,
    pub crashed_instances: usize,
}

pub struct ServiceRegistry {
    templates: RwLock<HashMap<String, ServiceTemplate>>,
    supervisor: Arc<Supervisor>,
}

impl ServiceRegistry {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
            supervisor,
        }
    }

    /// Register or atomically replace a template. Validated via
    /// `ServiceTemplate::validate` before it lands in the map.
    pub async fn register(&self, template: ServiceTemplate) -> Result<(), GatewayError> {
        template
            .validate()
            .map_err(GatewayError::PolicyViolation)?;
        self.templates.write().await.insert(template.name.clone(), template);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> Option<ServiceTemplate> {
        self.templates.write().await.remove(name)
    }

    pub async fn get_template(&self, name: &str) -> Option<ServiceTemplate> {
        self.templates.read().await.get(name).cloned()
    }

    pub async fn template_names(&self) -> Vec<String> {
        self.templates.read().await.keys().cloned().collect()
    }

    /// Instances currently tracked against `template_name`, in any state.
    pub async fn instances_for_template(&self, template_name: &str) -> Vec<ServiceInstance> {
        self.supervisor
            .list_instances()
            .await
            .into_iter()
            .filter(|instance| instance.template_ref == template_name)
            .collect()
    }

    /// Instances in `running` state for `template_name` — the router's
    /// candidate pool (spec §4.6 Selection).
    pub async fn running_instances(&self, template_name: &str) -> Vec<ServiceInstance> {
        self.instances_for_template(template_name)
            .await
            .into_iter()
            .filter(|instance| instance.state == InstanceState::Running)
            .collect()
    }

    /// Look up `template_name`, build the adapter its `transport` calls
    /// for, and hand both to the supervisor's `start_process` (spec §4.3).
    pub async fn start_instance(
        &self,
        template_name: &str,
        client_versions: &[&str],
        client_capabilities: serde_json::Value,
        runtime: &RuntimeContext,
    ) -> Result<ServiceInstance, GatewayError> {
        let template = self
            .get_template(template_name)
            .await
            .ok_or_else(|| GatewayError::PolicyViolation(format!("no template named '{template_name}'")))?;
        let adapter = adapter::build_adapter(&template, runtime)?;
        self.supervisor
            .start_process(template_name, client_versions, client_capabilities, adapter)
            .await
    }

    /// Restart an existing instance: re-look-up its template, build a
    /// fresh adapter, and hand both to `Supervisor::restart_process`
    /// (spec §8 "`restart` yields a fresh id but preserves the template
    /// reference").
    pub async fn restart_instance(
        &self,
        instance_id: &str,
        client_versions: &[&str],
        client_capabilities: serde_json::Value,
        runtime: &RuntimeContext,
    ) -> Result<ServiceInstance, GatewayError> {
        let current = self
            .supervisor
            .get_process_info(instance_id)
            .await
            .ok_or_else(|| GatewayError::InstanceNotFound(instance_id.to_string()))?;
        let template = self
            .get_template(&current.template_ref)
            .await
            .ok_or_else(|| GatewayError::PolicyViolation(format!("no template named '{}'", current.template_ref)))?;
        let adapter = adapter::build_adapter(&template, runtime)?;
        self.supervisor
            .restart_process(instance_id, client_versions, client_capabilities, adapter)
            .await
    }

    pub async fn health(&self, template_name: &str) -> TemplateHealth {
        let instances = self.instances_for_template(template_name).await;
        let mut health = TemplateHealth {
            total_instances: instances.len(),
            ..Default::default()
        };
        for instance in &instances {
            match instance.state {
                InstanceState::Running => health.running_instances += 1,
                InstanceState::Error => health.error_instances += 1,
                InstanceState::Crashed => health.crashed_instances += 1,
                _ => {}
            }
        }
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn template(name: &str) -> ServiceTemplate {
        ServiceTemplate {
            name: name.to_string(),
            transport: gw_core::TransportKind::Stdio,
            command: Some("npx".to_string()),
            args: vec![],
            env: HashMap::new(),
            container: None,
            description: None,
            trust_level: gw_core::TrustLevel::Untrusted,
            security: gw_core::SecurityOverrides::default(),
            timeouts: gw_core::TimeoutOverrides::default(),
            working_dir: None,
            url: None,
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let supervisor = Arc::new(Supervisor::new(Duration::from_secs(5)));
        let registry = ServiceRegistry::new(supervisor);
        registry.register(template("fetch")).await.unwrap();
        assert!(registry.get_template("fetch").await.is_some());
        assert_eq!(registry.template_names().await, vec!["fetch".to_string()]);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_atomically() {
        let supervisor = Arc::new(Supervisor::new(Duration::from_secs(5)));
        let registry = ServiceRegistry::new(supervisor);
        registry.register(template("fetch")).await.unwrap();
        let mut updated = template("fetch");
        updated.args = vec!["--verbose".to_string()];
        registry.register(updated).await.unwrap();
        let stored = registry.get_template("fetch").await.unwrap();
        assert_eq!(stored.args, vec!["--verbose".to_string()]);
    }

    #[tokio::test]
    async fn test_health_with_no_instances() {
        let supervisor = Arc::new(Supervisor::new(Duration::from_secs(5)));
        let registry = ServiceRegistry::new(supervisor);
        let health = registry.health("fetch").await;
        assert_eq!(health.total_instances, 0);
        assert_eq!(health.running_instances, 0);
    }

    #[tokio::test]
    async fn test_unregister_removes_template() {
        let supervisor = Arc::new(Supervisor::new(Duration::from_secs(5)));
        let registry = ServiceRegistry::new(supervisor);
        registry.register(template("fetch")).await.unwrap();
        assert!(registry.unregister("fetch").await.is_some());
        assert!(registry.get_template("fetch").await.is_none());
    }
}
