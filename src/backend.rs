use std::time::Duration;

use crate::endpoint::Endpoint;

/// Distinguishes a transport-level failure (the connection itself is
/// broken) from a protocol-level error reply (the backend responded, but
/// the reply itself represents an error).
///
/// hiredis tells these apart by returning `NULL` (transport) versus a
/// non-null `redisReply` of type `REDIS_REPLY_ERROR` (protocol). The
/// `redis` crate funnels both through `Result::Err`, so the split is
/// reconstructed here from `RedisError`'s own classification helpers.
#[derive(Debug)]
pub enum BackendFailure<E> {
    Transport(E),
    Protocol(E),
}

/// A single command to send to the backend: a command name plus
/// positional arguments, analogous to hiredis's printf-style
/// `redisCommand(fmt, ...)` dialect but built up explicitly instead of
/// via format-string substitution.
#[derive(Debug, Clone, Default)]
pub struct Command {
    parts: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(name: impl Into<Vec<u8>>) -> Self {
        Command {
            parts: vec![name.into()],
        }
    }

    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.parts.push(arg.into());
        self
    }

    pub fn parts(&self) -> &[Vec<u8>] {
        &self.parts
    }
}

/// The wire-codec boundary the pool consumes but does not implement.
///
/// A concrete implementation owns exactly one physical connection. The
/// pool never holds more than one `&mut` borrow of a given
/// `BackendConnection` at a time (enforced by the per-slot mutex), so
/// implementations need not be internally thread-safe.
pub trait BackendConnection: Sized {
    type Reply;
    type Error: std::fmt::Debug;

    /// Opens a new connection to `endpoint`, bounded by `connect_timeout`.
    fn connect(endpoint: &Endpoint, connect_timeout: Duration) -> Result<Self, Self::Error>;

    /// Authenticates the connection. Called at most once, right after
    /// `connect` succeeds, when the pool is configured with a password.
    fn auth(&mut self, password: &str) -> Result<(), Self::Error>;

    /// Applies a read/write timeout to the underlying socket.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Self::Error>;

    /// Enables TCP keep-alive on the underlying socket, best-effort.
    fn enable_keepalive(&mut self) -> Result<(), Self::Error>;

    /// Sends `cmd` and waits for a reply.
    fn command(&mut self, cmd: &Command) -> Result<Self::Reply, BackendFailure<Self::Error>>;

    /// The most recent transport-level error observed on this connection,
    /// if any. Mirrors hiredis's `redisContext::err` field, which is only
    /// ever set for connection-level failures, never for application
    /// error replies.
    fn last_error(&self) -> Option<&Self::Error>;
}

/// A [`BackendConnection`] backed by the synchronous `redis` crate client.
pub struct RedisConnection {
    conn: redis::Connection,
    last_error: Option<redis::RedisError>,
}

impl RedisConnection {
    fn is_transport_error(err: &redis::RedisError) -> bool {
        err.is_io_error() || err.is_timeout() || err.is_connection_dropped()
    }
}

impl BackendConnection for RedisConnection {
    type Reply = redis::Value;
    type Error = redis::RedisError;

    fn connect(endpoint: &Endpoint, connect_timeout: Duration) -> Result<Self, Self::Error> {
        let url = format!("redis://{}:{}/", endpoint.host, endpoint.port);
        let client = redis::Client::open(url)?;
        let conn = if connect_timeout.is_zero() {
            client.get_connection()?
        } else {
            client.get_connection_with_timeout(connect_timeout)?
        };
        Ok(RedisConnection {
            conn,
            last_error: None,
        })
    }

    fn auth(&mut self, password: &str) -> Result<(), Self::Error> {
        redis::cmd("AUTH").arg(password).query(&mut self.conn)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Self::Error> {
        let timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self.conn.set_read_timeout(timeout)?;
        self.conn.set_write_timeout(timeout)
    }

    fn enable_keepalive(&mut self) -> Result<(), Self::Error> {
        // The `redis` crate does not expose a public TCP keep-alive toggle
        // on an established `Connection`; the underlying socket options
        // are not reachable from here. Best-effort no-op.
        Ok(())
    }

    fn command(&mut self, cmd: &Command) -> Result<Self::Reply, BackendFailure<Self::Error>> {
        let mut redis_cmd = redis::Cmd::new();
        for part in cmd.parts() {
            redis_cmd.arg(part.as_slice());
        }
        match redis_cmd.query(&mut self.conn) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                if Self::is_transport_error(&err) {
                    let kind = err.kind();
                    self.last_error = Some(redis::RedisError::from((kind, "transport error", err.to_string())));
                    Err(BackendFailure::Transport(err))
                } else {
                    Err(BackendFailure::Protocol(err))
                }
            }
        }
    }

    fn last_error(&self) -> Option<&Self::Error> {
        self.last_error.as_ref()
    }
}
