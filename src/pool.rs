use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::backend::{BackendConnection, BackendFailure, Command};
use crate::config::PoolConfig;
use crate::endpoint::EndpointList;
use crate::error::ConfigError;
use crate::slot::{self, Slot, SlotState};

/// Hard ceiling on `PoolConfig::max_size`, matching the compile-time
/// constant from the design notes.
pub(crate) const MAX_SLOTS: usize = 1000;

/// A fixed-capacity collection of connection slots, a round-robin cursor,
/// a growth lock, and the pool-wide reconnect throttle.
///
/// `Pool` is a plain struct with interior mutability via atomics and
/// per-slot mutexes; it is not internally `Arc`'d or `Clone`. A caller
/// sharing a pool across threads wraps it in their own `Arc<Pool<B>>`.
pub struct Pool<B> {
    slots: Vec<Slot<B>>,
    active_count: AtomicUsize,
    cursor: AtomicUsize,
    growth_lock: Mutex<()>,
    connect_after_nanos: AtomicU64,
    created_at: Instant,
    endpoints: EndpointList,
    connect_timeout: Duration,
    io_timeout: Duration,
    retry_delay: Duration,
    password: String,
}

/// Result of [`Pool::acquire`].
pub enum AcquireOutcome<'p, B> {
    Acquired(Lease<'p, B>),
    Exhausted,
}

/// The result of forwarding a command through a [`Lease`].
pub enum CommandOutcome<R, E> {
    Reply(R),
    Protocol(E),
    Transport(E),
}

impl<R, E> CommandOutcome<R, E> {
    /// Whether this outcome represents a reply actually received on the
    /// wire. `Protocol` errors are replies (the backend responded, just
    /// with an application-level error); only `Transport` means no reply
    /// arrived at all. Feeds directly into [`Pool::release`].
    pub fn presence(&self) -> ReplyPresence {
        match self {
            CommandOutcome::Reply(_) | CommandOutcome::Protocol(_) => ReplyPresence::Received,
            CommandOutcome::Transport(_) => ReplyPresence::Absent,
        }
    }
}

/// Whether a reply was received on a leased connection since it was last
/// acquired, passed to [`Pool::release`] to decide whether the slot needs
/// replace-on-error.
///
/// A protocol-level error reply still counts as `Received`: the
/// connection itself is healthy, only the command was rejected or
/// errored at the application level (e.g. the source's AUTH-failure
/// case, which is logged and otherwise ignored). Only the total absence
/// of a reply — a transport failure — is `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPresence {
    Received,
    Absent,
}

/// Exclusive ownership of one slot, held by a caller between
/// [`Pool::acquire`] and [`Pool::release`].
///
/// The slot's mutex guard lives inside the lease for its entire lifetime;
/// dropping a `Lease` without passing it to `release` logs a fatal
/// internal-invariant warning and force-clears `in_use` so the slot does
/// not deadlock forever, but callers are expected to always call
/// `release` explicitly.
pub struct Lease<'p, B> {
    pool: &'p Pool<B>,
    index: usize,
    guard: Option<MutexGuard<'p, SlotState<B>>>,
}

impl<'p, B> Lease<'p, B> {
    pub fn slot_id(&self) -> usize {
        self.index
    }
}

impl<'p, B> Drop for Lease<'p, B> {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            log::error!(
                "slot {}: Lease dropped without release() being called; clearing in_use",
                guard.id
            );
            guard.in_use = false;
        }
    }
}

impl<B: BackendConnection> Pool<B> {
    /// Validates `config` and builds a pool, eagerly connecting
    /// `config.initial_size` slots.
    ///
    /// A pool that fails to connect every initial slot is still
    /// returned, with the failures logged at warn; later acquires may
    /// succeed once the retry-delay throttle elapses.
    pub fn create(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let max_size = config.max_size;
        let initial_size = config.initial_size;
        let endpoints = EndpointList::new(config.endpoints);
        let mut slots = Vec::with_capacity(max_size);
        for id in 0..max_size {
            slots.push(Slot::new(id, id % endpoints.len()));
        }

        let pool = Pool {
            slots,
            active_count: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
            growth_lock: Mutex::new(()),
            connect_after_nanos: AtomicU64::new(0),
            created_at: Instant::now(),
            endpoints,
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
            retry_delay: config.retry_delay,
            password: config.password,
        };

        for id in 0..initial_size {
            let mut state = pool.slots[id].mutex.lock();
            if pool.past_throttle() {
                if let Err(err) = slot::connect(
                    &mut state,
                    &pool.endpoints,
                    pool.connect_timeout,
                    pool.io_timeout,
                    &pool.password,
                ) {
                    log::warn!("initial slot {}: connect failed: {:?}", id, err);
                    pool.arm_throttle();
                }
            }
        }
        pool.active_count.store(initial_size, Ordering::Release);

        Ok(pool)
    }

    /// Number of slots currently promoted into the round-robin ring.
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    /// Number of active slots that currently hold a live connection.
    pub fn connected_count(&self) -> usize {
        let active = self.active_count();
        (0..active)
            .filter(|&i| self.slots[i].mutex.lock().conn.is_some())
            .count()
    }

    fn now_nanos(&self) -> u64 {
        self.created_at.elapsed().as_nanos() as u64
    }

    fn past_throttle(&self) -> bool {
        self.now_nanos() >= self.connect_after_nanos.load(Ordering::Relaxed)
    }

    fn arm_throttle(&self) {
        if self.retry_delay.is_zero() {
            return;
        }
        let deadline = self.now_nanos() + self.retry_delay.as_nanos() as u64;
        self.connect_after_nanos.store(deadline, Ordering::Relaxed);
    }

    /// Hands out exclusive access to a connected slot, growing the pool
    /// if every active slot is busy or unconnectable and capacity
    /// remains.
    pub fn acquire(&self) -> AcquireOutcome<'_, B> {
        let active = self.active_count();
        if active == 0 {
            return match self.grow() {
                Some(lease) => AcquireOutcome::Acquired(lease),
                None => AcquireOutcome::Exhausted,
            };
        }

        let start = self.cursor.load(Ordering::Relaxed) % active;
        let mut cur = start;
        loop {
            if let Some(mut guard) = self.slots[cur].mutex.try_lock() {
                if !guard.in_use {
                    guard.in_use = true;
                    if guard.conn.is_none() && self.past_throttle() {
                        if let Err(err) = slot::connect(
                            &mut guard,
                            &self.endpoints,
                            self.connect_timeout,
                            self.io_timeout,
                            &self.password,
                        ) {
                            log::warn!("slot {}: opportunistic reconnect failed: {:?}", cur, err);
                            self.arm_throttle();
                        }
                    }
                    if guard.conn.is_some() {
                        self.cursor.store((cur + 1) % active, Ordering::Relaxed);
                        return AcquireOutcome::Acquired(Lease {
                            pool: self,
                            index: cur,
                            guard: Some(guard),
                        });
                    }
                    guard.in_use = false;
                }
            }
            cur = (cur + 1) % active;
            if cur == start {
                break;
            }
        }

        match self.grow() {
            Some(lease) => AcquireOutcome::Acquired(lease),
            None => AcquireOutcome::Exhausted,
        }
    }

    /// Promotes the next inactive cell into the ring, connects it, and
    /// returns it leased if successful.
    fn grow(&self) -> Option<Lease<'_, B>> {
        let _growth = self.growth_lock.try_lock()?;
        let active = self.active_count.load(Ordering::Acquire);
        if active >= self.slots.len() {
            return None;
        }

        let mut guard = self.slots[active].mutex.lock();
        guard.id = active;
        guard.endpoint_index = active % self.endpoints.len();
        guard.in_use = true;

        match slot::connect(
            &mut guard,
            &self.endpoints,
            self.connect_timeout,
            self.io_timeout,
            &self.password,
        ) {
            Ok(()) => {
                self.active_count.store(active + 1, Ordering::Release);
                log::info!("pool grew to {} active slots", active + 1);
                Some(Lease {
                    pool: self,
                    index: active,
                    guard: Some(guard),
                })
            }
            Err(err) => {
                log::warn!("growth: connect for slot {} failed: {:?}", active, err);
                self.arm_throttle();
                guard.in_use = false;
                None
            }
        }
    }

    /// Returns a leased slot to the pool.
    ///
    /// `presence` should be [`ReplyPresence::Absent`] when the caller never
    /// got a reply on this slot at all (a transport failure occurred); a
    /// protocol-level error reply (e.g. a malformed command) still counts
    /// as [`ReplyPresence::Received`] and must not trigger replace-on-error
    /// on its own. `Absent` triggers replace-on-error before the slot is
    /// released back into the ring.
    pub fn release(&self, presence: ReplyPresence, mut lease: Lease<'_, B>) {
        let mut guard = lease.guard.take().expect("Lease always holds its guard");

        let broken = matches!(presence, ReplyPresence::Absent)
            || guard.conn.is_none()
            || guard.conn.as_ref().map_or(false, |c| c.last_error().is_some());
        if broken {
            if let Err(err) = slot::replace_on_error(
                &mut guard,
                &self.endpoints,
                self.connect_timeout,
                self.io_timeout,
                &self.password,
            ) {
                log::warn!("slot {}: replace-on-error reconnect failed: {:?}", guard.id, err);
                self.arm_throttle();
            }
        }

        if !guard.in_use {
            log::error!("slot {}: released while not marked in_use", guard.id);
        }
        guard.in_use = false;
    }

    /// Forwards `cmd` through `lease`'s connection, retrying once via an
    /// in-place reconnect on a transport failure.
    pub fn command(&self, lease: &mut Lease<'_, B>, cmd: &Command) -> CommandOutcome<B::Reply, B::Error> {
        let guard = lease.guard.as_mut().expect("Lease always holds its guard");
        match slot::command(
            guard,
            &self.endpoints,
            self.connect_timeout,
            self.io_timeout,
            &self.password,
            cmd,
        ) {
            Ok(reply) => CommandOutcome::Reply(reply),
            Err(BackendFailure::Protocol(err)) => CommandOutcome::Protocol(err),
            Err(BackendFailure::Transport(err)) => CommandOutcome::Transport(err),
        }
    }
}

impl<B> Drop for Pool<B> {
    fn drop(&mut self) {
        let active = self.active_count.load(Ordering::Acquire);
        for i in 0..active {
            let guard = self.slots[i].mutex.lock();
            if guard.in_use {
                log::error!("slot {}: destroyed while still in use", guard.id);
            }
        }
    }
}
