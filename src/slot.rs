use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{BackendConnection, BackendFailure, Command};
use crate::endpoint::EndpointList;

/// One pooled connection record: identity, current endpoint, and the
/// backend handle, all guarded by a single mutex.
///
/// The mutex's owner is the only thread permitted to mutate `state`,
/// `conn`, or `endpoint_index`; `in_use` is only ever observed/mutated
/// while the mutex is held (I1 in the design).
pub(crate) struct SlotState<B> {
    pub(crate) id: usize,
    pub(crate) endpoint_index: usize,
    pub(crate) conn: Option<B>,
    pub(crate) in_use: bool,
}

pub(crate) struct Slot<B> {
    pub(crate) mutex: Mutex<SlotState<B>>,
}

impl<B: BackendConnection> Slot<B> {
    pub(crate) fn new(id: usize, endpoint_index: usize) -> Self {
        Slot {
            mutex: Mutex::new(SlotState {
                id,
                endpoint_index,
                conn: None,
                in_use: false,
            }),
        }
    }
}

/// Implements the connect algorithm from the component design: walk the
/// endpoint ring starting at `state.endpoint_index` for up to
/// `endpoints.len()` attempts, authenticate, apply timeout/keepalive, and
/// leave `state.endpoint_index` pointing at the endpoint to try next time.
///
/// Returns the last connect error on exhaustion of the ring.
pub(crate) fn connect<B: BackendConnection>(
    state: &mut SlotState<B>,
    endpoints: &EndpointList,
    connect_timeout: Duration,
    io_timeout: Duration,
    password: &str,
) -> Result<(), B::Error> {
    let attempts = endpoints.len();
    let mut last_err = None;
    for _ in 0..attempts {
        let endpoint = endpoints.at(state.endpoint_index);
        match B::connect(endpoint, connect_timeout) {
            Ok(mut conn) => {
                if !password.is_empty() {
                    if let Err(err) = conn.auth(password) {
                        log::warn!(
                            "slot {}: AUTH failed against {}:{}: {:?}",
                            state.id, endpoint.host, endpoint.port, err
                        );
                        // Matches source behavior: an auth failure is
                        // logged and the connection is still used.
                    }
                }
                if let Err(err) = conn.set_timeout(io_timeout) {
                    log::warn!("slot {}: set_timeout failed: {:?}", state.id, err);
                }
                if let Err(err) = conn.enable_keepalive() {
                    log::warn!("slot {}: enable_keepalive failed: {:?}", state.id, err);
                }
                state.conn = Some(conn);
                log::debug!(
                    "slot {}: connected to {}:{}",
                    state.id, endpoint.host, endpoint.port
                );
                return Ok(());
            }
            Err(err) => {
                log::warn!(
                    "slot {}: connect to {}:{} failed: {:?}",
                    state.id, endpoint.host, endpoint.port, err
                );
                state.endpoint_index = endpoints.next_after(state.endpoint_index);
                last_err = Some(err);
            }
        }
    }
    state.conn = None;
    Err(last_err.expect("at least one endpoint means at least one attempt"))
}

/// Replace-on-error: the calling thread already holds `state`'s mutex, so
/// this degenerates to in-place mutation of the same cell rather than
/// splicing a new record into a list.
pub(crate) fn replace_on_error<B: BackendConnection>(
    state: &mut SlotState<B>,
    endpoints: &EndpointList,
    connect_timeout: Duration,
    io_timeout: Duration,
    password: &str,
) -> Result<(), B::Error> {
    if state.conn.take().is_some() {
        log::debug!("slot {}: discarding broken connection", state.id);
    }
    connect(state, endpoints, connect_timeout, io_timeout, password)
}

/// Sends `cmd` on a connected slot, retrying once via a fresh
/// connect-in-place if the first attempt reports a transport failure.
///
/// Panics if called on a slot with no connection; the pool never hands
/// out an unconnected slot (acquire only returns connected slots).
pub(crate) fn command<B: BackendConnection>(
    state: &mut SlotState<B>,
    endpoints: &EndpointList,
    connect_timeout: Duration,
    io_timeout: Duration,
    password: &str,
    cmd: &Command,
) -> Result<B::Reply, BackendFailure<B::Error>> {
    let conn = state
        .conn
        .as_mut()
        .expect("command invoked on an unconnected slot");

    match conn.command(cmd) {
        Ok(reply) => Ok(reply),
        Err(BackendFailure::Protocol(err)) => Err(BackendFailure::Protocol(err)),
        Err(BackendFailure::Transport(_)) => {
            log::warn!("slot {}: transport error, reconnecting", state.id);
            match replace_on_error(state, endpoints, connect_timeout, io_timeout, password) {
                Ok(()) => {
                    let conn = state.conn.as_mut().expect("just connected");
                    conn.command(cmd)
                }
                Err(err) => Err(BackendFailure::Transport(err)),
            }
        }
    }
}
