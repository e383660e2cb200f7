//! xzrpc-server — accepts RPC connections and dispatches their requests.
//!
//! * `server`: the `Server` itself, listener setup and the accept loop.
//! * `conn`: one connection end to end: read, dispatch, respond, drain.
//! * `http`: the HTTP CONNECT bootstrap in front of a connection.

pub mod conn;
pub mod http;
pub mod server;

pub use server::{bind_listener, Server};
