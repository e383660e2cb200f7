//! `Arith` — the built-in demo service.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::service::{RpcService, ServiceBuilder, ServiceError};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ArithArgs {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SleepArgs {
    pub ms: u64,
    /// Echoed back once the sleep is over.
    #[serde(default)]
    pub tag: String,
}

/// Integer arithmetic plus a `Sleep` method for exercising concurrency.
#[derive(Debug, Default)]
pub struct Arith;

impl Arith {
    fn add(&self, args: ArithArgs, reply: &mut i64) -> Result<(), ServiceError> {
        *reply = args
            .a
            .checked_add(args.b)
            .ok_or_else(|| ServiceError::new("integer overflow"))?;
        Ok(())
    }

    fn multiply(&self, args: ArithArgs, reply: &mut i64) -> Result<(), ServiceError> {
        *reply = args
            .a
            .checked_mul(args.b)
            .ok_or_else(|| ServiceError::new("integer overflow"))?;
        Ok(())
    }

    fn divide(&self, args: ArithArgs, reply: &mut i64) -> Result<(), ServiceError> {
        if args.b == 0 {
            return Err(ServiceError::new("divide by zero"));
        }
        *reply = args
            .a
            .checked_div(args.b)
            .ok_or_else(|| ServiceError::new("integer overflow"))?;
        Ok(())
    }

    async fn sleep(self: Arc<Self>, args: SleepArgs) -> Result<String, ServiceError> {
        tokio::time::sleep(Duration::from_millis(args.ms)).await;
        Ok(args.tag)
    }
}

impl RpcService for Arith {
    fn name(&self) -> &str {
        "Arith"
    }

    fn methods(builder: ServiceBuilder<Self>) -> ServiceBuilder<Self> {
        builder
            .method("Add", Arith::add)
            .method("Multiply", Arith::multiply)
            .method("Divide", Arith::divide)
            .async_method("Sleep", Arith::sleep)
    }
}
