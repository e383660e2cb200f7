//! Services and their methods.
//!
//! A `Service` is a name plus a table of `MethodType`s built once, at
//! registration, by a `ServiceBuilder`. Each method owns a typed handler that
//! decodes its own argument and encodes its own reply, so dispatch is a
//! lookup by name and nothing is inspected at runtime.

use std::any::type_name;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use xzrpc_core::{Codec, CodecError};

/// Error returned by a service method. Travels to the caller as the reply
/// header's error text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ServiceError(String);

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<CodecError> for ServiceError {
    fn from(e: CodecError) -> Self {
        Self(format!("failed to encode reply: {e}"))
    }
}

type ReplyFuture = Pin<Box<dyn Future<Output = Result<Bytes, ServiceError>> + Send>>;

type Handler = dyn Fn(Codec, &[u8]) -> Result<Invocation, CodecError> + Send + Sync;

/// Decoded arguments bound to their method, ready to run.
///
/// Produced by `MethodType::new_invocation` on the reading task and consumed
/// by `Service::call` on the dispatch task. Running it allocates a fresh
/// reply, calls the method and encodes the reply with the request's codec.
pub struct Invocation {
    run: ReplyFuture,
}

impl Invocation {
    fn new(run: impl Future<Output = Result<Bytes, ServiceError>> + Send + 'static) -> Self {
        Self { run: Box::pin(run) }
    }
}

/// Descriptor of one method of a service.
pub struct MethodType {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    handler: Box<Handler>,
    num_calls: AtomicU64,
}

impl MethodType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// Decode a fresh argument value from a request body.
    pub fn new_invocation(&self, codec: Codec, body: &[u8]) -> Result<Invocation, CodecError> {
        (self.handler)(codec, body)
    }

    /// Calls started on this method since registration.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodType")
            .field("name", &self.name)
            .field("arg_type", &self.arg_type)
            .field("reply_type", &self.reply_type)
            .field("num_calls", &self.num_calls())
            .finish()
    }
}

/// A named dispatch target. Immutable once built.
#[derive(Debug)]
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    pub fn builder<T: Send + Sync + 'static>(
        name: impl Into<String>,
        instance: T,
    ) -> ServiceBuilder<T> {
        ServiceBuilder {
            name: name.into(),
            instance: Arc::new(instance),
            methods: HashMap::new(),
        }
    }

    /// Build a service from an instance that declares its own name and methods.
    pub fn from_instance<T: RpcService>(instance: T) -> Self {
        let name = instance.name().to_string();
        T::methods(Service::builder(name, instance)).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<Arc<MethodType>> {
        self.methods.get(name).cloned()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodType>> {
        self.methods.values()
    }

    /// Run `invocation` against `mtype` and return its outcome unchanged.
    pub async fn call(
        &self,
        mtype: &MethodType,
        invocation: Invocation,
    ) -> Result<Bytes, ServiceError> {
        mtype.num_calls.fetch_add(1, Ordering::Relaxed);
        invocation.run.await
    }
}

/// Something that can be registered with a `ServiceDirectory`.
pub trait RpcService: Send + Sync + Sized + 'static {
    /// Name callers use as the `Service` half of `Service.Method`.
    fn name(&self) -> &str;

    /// Declare the methods the service exposes.
    fn methods(builder: ServiceBuilder<Self>) -> ServiceBuilder<Self>;
}

/// Collects the method table of a service.
pub struct ServiceBuilder<T> {
    name: String,
    instance: Arc<T>,
    methods: HashMap<String, Arc<MethodType>>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    /// Add a method with the (argument, reply) → outcome shape.
    ///
    /// The reply starts out as `R::default()` and is sent only if the method
    /// returns `Ok`.
    pub fn method<A, R, F>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        F: Fn(&T, A, &mut R) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        let instance = self.instance.clone();
        let f = Arc::new(f);
        let handler = move |codec: Codec, body: &[u8]| -> Result<Invocation, CodecError> {
            let args: A = codec.decode(body)?;
            let instance = instance.clone();
            let f = f.clone();
            Ok(Invocation::new(async move {
                let mut reply = R::default();
                (*f)(instance.as_ref(), args, &mut reply)?;
                Ok(Bytes::from(codec.encode(&reply)?))
            }))
        };
        self.insert::<A, R>(name, Box::new(handler));
        self
    }

    /// Add an async method that returns its reply.
    pub fn async_method<A, R, F, Fut>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ServiceError>> + Send + 'static,
    {
        let instance = self.instance.clone();
        let f = Arc::new(f);
        let handler = move |codec: Codec, body: &[u8]| -> Result<Invocation, CodecError> {
            let args: A = codec.decode(body)?;
            let instance = instance.clone();
            let f = f.clone();
            Ok(Invocation::new(async move {
                let reply = (*f)(instance, args).await?;
                Ok(Bytes::from(codec.encode(&reply)?))
            }))
        };
        self.insert::<A, R>(name, Box::new(handler));
        self
    }

    fn insert<A, R>(&mut self, name: &str, handler: Box<Handler>) {
        if self.methods.contains_key(name) {
            tracing::warn!(service = %self.name, method = name, "method declared twice, keeping the last");
        }
        self.methods.insert(
            name.to_string(),
            Arc::new(MethodType {
                name: name.to_string(),
                arg_type: type_name::<A>(),
                reply_type: type_name::<R>(),
                handler,
                num_calls: AtomicU64::new(0),
            }),
        );
    }

    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}
