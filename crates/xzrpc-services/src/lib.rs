//! xzrpc-services — what the server dispatches to, and who is serving.
//!
//! * `directory` / `service`: registered services and name-based method
//!   resolution.
//! * `registry`: the discovery registry of live server addresses.
//! * `arith`: a small built-in service.

pub mod arith;
pub mod directory;
pub mod registry;
pub mod service;

pub use arith::Arith;
pub use directory::{clip_name, DirectoryError, ServiceDirectory, ServiceInfo};
pub use registry::{app_key, unix_now, AppKey, App, DiscoveryRegistry, RegistryError, ServerItem};
pub use service::{Invocation, MethodType, RpcService, Service, ServiceBuilder, ServiceError};
