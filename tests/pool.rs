use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use kvpool::{
    AcquireOutcome, BackendConnection, BackendFailure, Command, CommandOutcome, Endpoint, Pool,
    PoolConfig, ReplyPresence,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Per-host scripted behavior for [`MockBackend`], looked up by endpoint
/// host name so each test can drive a distinct, isolated fleet of hosts.
#[derive(Default)]
struct HostScript {
    connect_fail: VecDeque<bool>,
    command_transport_fail: VecDeque<bool>,
    command_protocol_fail: VecDeque<bool>,
}

fn registry() -> &'static Mutex<HashMap<String, HostScript>> {
    static REG: OnceLock<Mutex<HashMap<String, HostScript>>> = OnceLock::new();
    REG.get_or_init(|| Mutex::new(HashMap::new()))
}

fn script(host: &str, f: impl FnOnce(&mut HostScript)) {
    let mut reg = registry().lock().unwrap();
    f(reg.entry(host.to_string()).or_default());
}

struct MockBackend {
    host: String,
}

impl BackendConnection for MockBackend {
    type Reply = String;
    type Error = String;

    fn connect(endpoint: &Endpoint, _connect_timeout: Duration) -> Result<Self, Self::Error> {
        let mut reg = registry().lock().unwrap();
        let entry = reg.entry(endpoint.host.clone()).or_default();
        let fail = entry.connect_fail.pop_front().unwrap_or(false);
        if fail {
            Err(format!("refused: {}", endpoint.host))
        } else {
            Ok(MockBackend {
                host: endpoint.host.clone(),
            })
        }
    }

    fn auth(&mut self, _password: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), Self::Error> {
        Ok(())
    }

    fn enable_keepalive(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn command(&mut self, cmd: &Command) -> Result<Self::Reply, BackendFailure<Self::Error>> {
        let mut reg = registry().lock().unwrap();
        let entry = reg.entry(self.host.clone()).or_default();
        if entry.command_transport_fail.pop_front().unwrap_or(false) {
            return Err(BackendFailure::Transport(format!(
                "transport error on {}",
                self.host
            )));
        }
        if entry.command_protocol_fail.pop_front().unwrap_or(false) {
            return Err(BackendFailure::Protocol(format!(
                "WRONGTYPE on {}",
                self.host
            )));
        }
        let name = String::from_utf8_lossy(&cmd.parts()[0]).to_string();
        Ok(format!("{}:{}", self.host, name))
    }

    fn last_error(&self) -> Option<&Self::Error> {
        None
    }
}

fn config(endpoints: Vec<Endpoint>, initial_size: usize, max_size: usize) -> PoolConfig {
    PoolConfig {
        endpoints,
        connect_timeout: Duration::from_millis(50),
        io_timeout: Duration::from_millis(50),
        initial_size,
        max_size,
        retry_delay: Duration::from_millis(50),
        password: String::new(),
    }
}

#[test]
fn happy_path_two_distinct_slots() {
    init_logging();
    let endpoints = vec![Endpoint::new("s1-h1", 6379)];
    let pool: Pool<MockBackend> = Pool::create(config(endpoints, 2, 2)).unwrap();

    let lease_a = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("expected a slot"),
    };
    let lease_b = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("expected a slot"),
    };
    assert_ne!(lease_a.slot_id(), lease_b.slot_id());
    assert_eq!(pool.active_count(), 2);

    let mut lease_a = lease_a;
    let mut lease_b = lease_b;
    let outcome_a = pool.command(&mut lease_a, &Command::new("PING"));
    assert!(matches!(outcome_a, CommandOutcome::Reply(_)));
    let outcome_b = pool.command(&mut lease_b, &Command::new("PING"));
    assert!(matches!(outcome_b, CommandOutcome::Reply(_)));

    pool.release(outcome_a.presence(), lease_a);
    pool.release(outcome_b.presence(), lease_b);
}

#[test]
fn failover_on_connect() {
    init_logging();
    script("s2-down", |h| h.connect_fail.push_back(true));
    let endpoints = vec![Endpoint::new("s2-down", 1), Endpoint::new("s2-up", 6379)];
    let pool: Pool<MockBackend> = Pool::create(config(endpoints, 1, 1)).unwrap();

    assert_eq!(pool.connected_count(), 1);
    let lease = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("expected a slot after failover"),
    };
    pool.release(ReplyPresence::Received, lease);
}

#[test]
fn retry_delay_suppresses_reconnect_storms() {
    init_logging();
    script("s3-down", |h| {
        h.connect_fail.push_back(true);
        h.connect_fail.push_back(true);
        h.connect_fail.push_back(true);
    });
    let endpoints = vec![Endpoint::new("s3-down", 1)];
    let pool: Pool<MockBackend> = Pool::create(config(endpoints, 1, 1)).unwrap();
    assert_eq!(pool.connected_count(), 0);

    // Within the retry-delay window, acquire must not spend another
    // connect attempt against the still-down host.
    match pool.acquire() {
        AcquireOutcome::Exhausted => {}
        AcquireOutcome::Acquired(lease) => {
            pool.release(ReplyPresence::Absent, lease);
            panic!("expected Exhausted while throttled");
        }
    }

    let remaining = registry()
        .lock()
        .unwrap()
        .get("s3-down")
        .map(|h| h.connect_fail.len())
        .unwrap_or(0);
    assert_eq!(remaining, 2, "throttle should have prevented a second connect attempt");
}

#[test]
fn lazy_growth_under_contention() {
    init_logging();
    let endpoints = vec![Endpoint::new("s4-h1", 6379)];
    let pool: Pool<MockBackend> = Pool::create(config(endpoints, 1, 3)).unwrap();

    let lease_a = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("expected slot 0"),
    };
    assert_eq!(lease_a.slot_id(), 0);

    let lease_b = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("expected growth to produce a slot"),
    };
    assert_eq!(lease_b.slot_id(), 1);
    assert_eq!(pool.active_count(), 2);

    pool.release(ReplyPresence::Received, lease_a);
    pool.release(ReplyPresence::Received, lease_b);
}

#[test]
fn transport_error_mid_command_retries_once() {
    init_logging();
    script("s5-h1", |h| h.command_transport_fail.push_back(true));
    let endpoints = vec![Endpoint::new("s5-h1", 6379)];
    let pool: Pool<MockBackend> = Pool::create(config(endpoints, 1, 1)).unwrap();

    let mut lease = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("expected a slot"),
    };
    let outcome = pool.command(&mut lease, &Command::new("GET").arg("k"));
    match &outcome {
        CommandOutcome::Reply(r) => assert_eq!(r, "s5-h1:GET"),
        other => panic!("expected a reply after the transparent retry, got {:?}", debug(other)),
    }
    pool.release(outcome.presence(), lease);
}

#[test]
fn protocol_error_reply_does_not_trigger_replace() {
    init_logging();
    script("s7-h1", |h| h.command_protocol_fail.push_back(true));
    let endpoints = vec![Endpoint::new("s7-h1", 6379)];
    let pool: Pool<MockBackend> = Pool::create(config(endpoints, 1, 1)).unwrap();

    let mut lease = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("expected a slot"),
    };
    let outcome = pool.command(&mut lease, &Command::new("BADCMD"));
    assert!(matches!(outcome, CommandOutcome::Protocol(_)));
    assert_eq!(outcome.presence(), ReplyPresence::Received);

    // Releasing with `Received` must keep the existing connection in
    // place rather than tearing it down, since a protocol-level error
    // reply means the connection is healthy.
    let slot_id = lease.slot_id();
    pool.release(outcome.presence(), lease);

    let lease = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("expected the same slot back"),
    };
    assert_eq!(lease.slot_id(), slot_id);
    pool.release(ReplyPresence::Received, lease);
}

#[test]
fn release_on_broken_connection_triggers_replace() {
    init_logging();
    let endpoints = vec![Endpoint::new("s6-h1", 6379)];
    let pool: Pool<MockBackend> = Pool::create(config(endpoints, 1, 1)).unwrap();

    let lease = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("expected a slot"),
    };
    // No reply obtained: simulates a transport failure the caller observed
    // directly rather than through `Pool::command`.
    pool.release(ReplyPresence::Absent, lease);

    let lease = match pool.acquire() {
        AcquireOutcome::Acquired(l) => l,
        AcquireOutcome::Exhausted => panic!("replacement connect should have succeeded"),
    };
    pool.release(ReplyPresence::Received, lease);
}

fn debug<R: std::fmt::Debug, E: std::fmt::Debug>(outcome: &CommandOutcome<R, E>) -> String {
    match outcome {
        CommandOutcome::Reply(r) => format!("Reply({:?})", r),
        CommandOutcome::Protocol(e) => format!("Protocol({:?})", e),
        CommandOutcome::Transport(e) => format!("Transport({:?})", e),
    }
}
