//! Service directory — registered services and `Service.Method` resolution.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::service::{MethodType, RpcService, Service};

/// Errors raised while registering or resolving services.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("service {0} is already registered")]
    AlreadyRegistered(String),

    #[error("malformed service method {0:?}: expected Service.Method")]
    MalformedName(String),

    #[error("can't find service {0}")]
    ServiceNotFound(String),

    #[error("can't find method {method} on service {service}")]
    MethodNotFound { service: String, method: String },
}

/// Longest name echoed back in an error. Anything longer is cut at a char
/// boundary and marked with `...`.
pub const MAX_ECHOED_NAME: usize = 128;

/// `name`, shortened to at most `MAX_ECHOED_NAME` bytes plus the marker.
pub fn clip_name(name: &str) -> String {
    if name.len() <= MAX_ECHOED_NAME {
        return name.to_string();
    }
    let mut end = MAX_ECHOED_NAME;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &name[..end])
}

/// All services this server can dispatch to, keyed by name.
#[derive(Default)]
pub struct ServiceDirectory {
    services: DashMap<String, Arc<Service>>,
}

/// Snapshot of one registered service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    /// (method, calls so far), sorted by method name.
    pub methods: Vec<(String, u64)>,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance under the name it declares.
    pub fn register<T: RpcService>(&self, instance: T) -> Result<(), DirectoryError> {
        self.register_service(Service::from_instance(instance))
    }

    /// Register a prebuilt service. A name can only be registered once; a
    /// second attempt fails and leaves the first registration in place.
    pub fn register_service(&self, service: Service) -> Result<(), DirectoryError> {
        match self.services.entry(service.name().to_string()) {
            Entry::Occupied(e) => Err(DirectoryError::AlreadyRegistered(e.key().clone())),
            Entry::Vacant(e) => {
                tracing::info!(
                    service = %service.name(),
                    methods = service.methods().count(),
                    "service registered"
                );
                e.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Resolve "Service.Method". The split is at the last '.', so service
    /// names may themselves contain dots.
    pub fn find_service(
        &self,
        service_method: &str,
    ) -> Result<(Arc<Service>, Arc<MethodType>), DirectoryError> {
        let (service_name, method_name) = service_method
            .rsplit_once('.')
            .ok_or_else(|| DirectoryError::MalformedName(clip_name(service_method)))?;

        let service = self
            .services
            .get(service_name)
            .map(|s| s.value().clone())
            .ok_or_else(|| DirectoryError::ServiceNotFound(clip_name(service_name)))?;

        let method = service
            .method(method_name)
            .ok_or_else(|| DirectoryError::MethodNotFound {
                service: clip_name(service_name),
                method: clip_name(method_name),
            })?;

        Ok((service, method))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.services.get(name).map(|s| s.value().clone())
    }

    /// Every registered service, sorted by name.
    pub fn services(&self) -> Vec<ServiceInfo> {
        let mut out: Vec<ServiceInfo> = self
            .services
            .iter()
            .map(|e| {
                let mut methods: Vec<(String, u64)> = e
                    .value()
                    .methods()
                    .map(|m| (m.name().to_string(), m.num_calls()))
                    .collect();
                methods.sort();
                ServiceInfo {
                    name: e.key().clone(),
                    methods,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
