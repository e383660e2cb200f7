use std::collections::HashMap;

use xzrpc_core::config::Backpressure;
use xzrpc_services::arith::{ArithArgs, SleepArgs};

use crate::*;

/// K concurrent calls on one connection: K replies, each matching its own
/// request, none carrying an error.
#[tokio::test]
async fn test_concurrent_calls_on_one_connection() -> Result<()> {
    let rpc = start_rpc(ServerConfig::default(), Transport::Raw).await?;
    let mut client = Client::connect(rpc.addr).await?;

    const K: u64 = 64;
    for seq in 0..K {
        // Odd requests sleep a little so replies come back out of order.
        if seq % 2 == 1 {
            let args = SleepArgs {
                ms: (K - seq) * 2,
                tag: format!("tag-{seq}"),
            };
            client.send("Arith.Sleep", seq, &args).await?;
        } else {
            let args = ArithArgs {
                a: seq as i64,
                b: 3,
            };
            client.send("Arith.Multiply", seq, &args).await?;
        }
    }

    let mut seen = HashMap::new();
    for _ in 0..K {
        let reply = client.recv().await?;
        assert!(!reply.header.is_error(), "seq {}: {}", reply.header.seq, reply.header.error);
        seen.insert(reply.header.seq, reply);
    }
    assert_eq!(seen.len(), K as usize);

    for (seq, reply) in &seen {
        if seq % 2 == 1 {
            assert_eq!(reply.header.service_method, "Arith.Sleep");
            let tag: String = Codec::Json.decode(&reply.body)?;
            assert_eq!(tag, format!("tag-{seq}"));
        } else {
            assert_eq!(reply.header.service_method, "Arith.Multiply");
            let product: i64 = Codec::Json.decode(&reply.body)?;
            assert_eq!(product, *seq as i64 * 3);
        }
    }

    drop(client);
    let pool = rpc.server.pool().clone();
    assert!(
        wait_until(Duration::from_secs(2), || pool.outstanding() == 0).await,
        "pooled messages still out"
    );
    assert_eq!(pool.taken(), K);
    assert_eq!(pool.returned(), K);
    Ok(())
}

/// Several connections at once, each with its own stream of calls.
#[tokio::test]
async fn test_many_connections() -> Result<()> {
    let rpc = start_rpc(ServerConfig::default(), Transport::Raw).await?;

    let mut tasks = Vec::new();
    for conn in 0..8i64 {
        let addr = rpc.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await?;
            for seq in 0..16u64 {
                let args = ArithArgs {
                    a: conn * 100,
                    b: seq as i64,
                };
                client.send("Arith.Add", seq, &args).await?;
            }
            for _ in 0..16 {
                let reply = client.recv().await?;
                let sum: i64 = Codec::Json.decode(&reply.body)?;
                assert_eq!(sum, conn * 100 + reply.header.seq as i64);
            }
            anyhow::Ok(())
        }));
    }

    for task in tasks {
        task.await??;
    }
    Ok(())
}

/// A request that can't be dispatched is answered with an error and the
/// connection keeps working.
#[tokio::test]
async fn test_errors_keep_connection_open() -> Result<()> {
    let rpc = start_rpc(ServerConfig::default(), Transport::Raw).await?;
    let mut client = Client::connect(rpc.addr).await?;

    client.send("Missing.Add", 1, &ArithArgs::default()).await?;
    let reply = client.recv().await?;
    assert_eq!(reply.header.seq, 1);
    assert_eq!(reply.header.error, "can't find service Missing");
    assert!(reply.body.is_empty());

    client.send("Arith.Divide", 2, &ArithArgs { a: 1, b: 0 }).await?;
    let reply = client.recv().await?;
    assert_eq!(reply.header.error, "divide by zero");

    client.send("Arith.Add", 3, &ArithArgs { a: 40, b: 2 }).await?;
    let reply = client.recv().await?;
    assert!(!reply.header.is_error());
    assert_eq!(Codec::Json.decode::<i64>(&reply.body)?, 42);
    Ok(())
}

/// RPC after an HTTP CONNECT handshake.
#[tokio::test]
async fn test_http_connect_transport() -> Result<()> {
    let rpc = start_rpc(ServerConfig::default(), Transport::Http).await?;
    let mut client = Client::connect_http(rpc.addr).await?;

    client.send("Arith.Add", 7, &ArithArgs { a: 1, b: 2 }).await?;
    let reply = client.recv().await?;
    assert_eq!(reply.header.seq, 7);
    assert_eq!(Codec::Json.decode::<i64>(&reply.body)?, 3);

    // Plain HTTP is turned away.
    let resp = reqwest::get(format!("http://{}/", rpc.addr)).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.text().await?, "only support CONNECT method\n");
    Ok(())
}

/// Reject backpressure answers over-limit requests with a busy error.
#[tokio::test]
async fn test_reject_when_busy() -> Result<()> {
    let config = ServerConfig {
        max_inflight_per_conn: 2,
        backpressure: Backpressure::Reject,
        ..ServerConfig::default()
    };
    let rpc = start_rpc(config, Transport::Raw).await?;
    let mut client = Client::connect(rpc.addr).await?;

    let slow = SleepArgs {
        ms: 300,
        tag: String::new(),
    };
    client.send("Arith.Sleep", 1, &slow).await?;
    client.send("Arith.Sleep", 2, &slow).await?;
    client.send("Arith.Add", 3, &ArithArgs { a: 1, b: 1 }).await?;

    let busy = client.recv().await?;
    assert_eq!(busy.header.seq, 3);
    assert_eq!(busy.header.error, "server busy: 2 requests in flight");

    let mut rest = vec![client.recv().await?.header.seq, client.recv().await?.header.seq];
    rest.sort();
    assert_eq!(rest, vec![1, 2]);
    Ok(())
}

/// The per-request deadline turns a slow call into a timeout error.
#[tokio::test]
async fn test_request_deadline() -> Result<()> {
    let config = ServerConfig {
        request_timeout_ms: 50,
        ..ServerConfig::default()
    };
    let rpc = start_rpc(config, Transport::Raw).await?;
    let mut client = Client::connect(rpc.addr).await?;

    let slow = SleepArgs {
        ms: 10_000,
        tag: String::new(),
    };
    client.send("Arith.Sleep", 1, &slow).await?;
    client.send("Arith.Add", 2, &ArithArgs { a: 2, b: 2 }).await?;

    let fast = client.recv().await?;
    assert_eq!(fast.header.seq, 2);
    let slow = client.recv().await?;
    assert_eq!(slow.header.seq, 1);
    assert_eq!(slow.header.error, "request timed out after 50ms");
    Ok(())
}
