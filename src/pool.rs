//! Shared, reference-counted connections to possibly-remote paths.
//!
//! Several stations (and anything else touching a remote path) may work on
//! the same network share at the same time. Opening and closing the share
//! around every operation lets one consumer tear the connection down while
//! another still reads through it, so the pool keeps a single
//! [`SharedConnection`]-style entry per share and counts its users.
//!
//! # Lifecycle
//!
//! ```text
//! get_connection(path) ──▶ canonical share ──▶ entry exists? ──no──▶ connect, insert
//!                                                   │                    │
//!                                                   └──────yes───────────┤
//!                                                                        ▼
//!                                                           use_count += 1, lease
//!
//! lease dropped / released ──▶ use_count -= 1 ──▶ zero? ──▶ remove entry, disconnect
//! ```
//!
//! All pool state sits behind one mutex. Connect and disconnect happen while
//! it is held, so a share is never being torn down while a new lease for it
//! is being created.
//!
//! Local paths all share one entry under [`LOCAL_SHARE`] and never connect.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::process::Command;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::error::PoolError;

/// Pool key shared by every non-network path.
pub const LOCAL_SHARE: &str = "localhost";

// ═══════════════════════════════════════════════════════════════════════
// Connectors
// ═══════════════════════════════════════════════════════════════════════

/// An open connection to a share. Dropping it disconnects.
pub trait ShareSession: Send {}

/// Performs the actual connect for a remote share.
pub trait ShareConnector: Send + Sync {
    fn connect(&self, share: &str, user: &str, password: &str) -> Result<Box<dyn ShareSession>>;
}

/// Assumes shares are already reachable (mounted, or credentials cached by
/// the OS). Never fails.
pub struct NoopConnector;

struct NoopSession;

impl ShareSession for NoopSession {}

impl ShareConnector for NoopConnector {
    fn connect(&self, _share: &str, _user: &str, _password: &str) -> Result<Box<dyn ShareSession>> {
        Ok(Box::new(NoopSession))
    }
}

/// Connects by running external commands, e.g. `net use` or a mount helper.
///
/// Arguments may contain `{share}`, `{user}` and `{password}` placeholders.
/// A non-zero exit of the connect command is a connect failure; the
/// disconnect command runs when the last lease is released.
pub struct CommandConnector {
    connect: Vec<String>,
    disconnect: Option<Vec<String>>,
}

impl CommandConnector {
    pub fn new(connect: Vec<String>, disconnect: Option<Vec<String>>) -> Result<Self> {
        if connect.is_empty() {
            bail!("connect command must not be empty");
        }
        if matches!(&disconnect, Some(d) if d.is_empty()) {
            bail!("disconnect command must not be empty");
        }
        Ok(Self {
            connect,
            disconnect,
        })
    }
}

struct CommandSession {
    share: String,
    disconnect: Option<Vec<String>>,
}

impl ShareSession for CommandSession {}

impl Drop for CommandSession {
    fn drop(&mut self) {
        if let Some(args) = &self.disconnect {
            if let Err(e) = run_command(args) {
                warn!(share = %self.share, "disconnect failed: {:#}", e);
            }
        }
    }
}

impl ShareConnector for CommandConnector {
    fn connect(&self, share: &str, user: &str, password: &str) -> Result<Box<dyn ShareSession>> {
        let args = substitute(&self.connect, share, user, password);
        run_command(&args).with_context(|| format!("Failed to connect to '{}'", share))?;
        Ok(Box::new(CommandSession {
            share: share.to_string(),
            disconnect: self
                .disconnect
                .as_ref()
                .map(|d| substitute(d, share, user, password)),
        }))
    }
}

fn substitute(template: &[String], share: &str, user: &str, password: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{share}", share)
                .replace("{user}", user)
                .replace("{password}", password)
        })
        .collect()
}

fn run_command(args: &[String]) -> Result<()> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("empty command"))?;
    let output = Command::new(program)
        .args(rest)
        .output()
        .with_context(|| format!("Failed to run {}", program))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{} exited with {}: {}", program, output.status, stderr.trim());
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Canonical share identity
// ═══════════════════════════════════════════════════════════════════════

fn share_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\\\\[a-zA-Z0-9._-]+\\[a-zA-Z0-9`~!@#$%^&(){}'._-]+)(?:\\.*)?$")
            .expect("share pattern compiles")
    })
}

/// Reduce `path` to the key the pool tracks it under.
///
/// Network paths (`\\server\share\...` or `//server/share/...`) reduce to
/// `\\server\share`; any other path is [`LOCAL_SHARE`].
pub fn canonical_share_path(path: &str) -> Result<String, PoolError> {
    let normalized = path.replace('/', "\\");
    if !normalized.starts_with("\\\\") {
        return Ok(LOCAL_SHARE.to_string());
    }
    share_pattern()
        .captures(&normalized)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| PoolError::InvalidSharePath(path.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════
// Pool
// ═══════════════════════════════════════════════════════════════════════

/// One pooled connection and the number of leases currently held on it.
struct SharedConnection {
    serial: u64,
    use_count: usize,
    error_message: Option<String>,
    // dropped (and so disconnected) when the entry leaves the pool
    _session: Option<Box<dyn ShareSession>>,
}

impl SharedConnection {
    fn increment_use(&mut self) {
        self.use_count += 1;
    }

    /// Returns the remaining use count.
    ///
    /// # Panics
    ///
    /// If the count is already zero: some lease was released twice.
    fn decrement_use(&mut self, share: &str) -> usize {
        if self.use_count == 0 {
            panic!("use count already zero for shared connection {} #{}", share, self.serial);
        }
        self.use_count -= 1;
        self.use_count
    }
}

struct PoolState {
    connections: HashMap<String, SharedConnection>,
    next_serial: u64,
}

struct PoolInner {
    state: Mutex<PoolState>,
    connector: Box<dyn ShareConnector>,
}

impl PoolInner {
    fn release_share(&self, share: &str, serial: u64) {
        let mut state = self.state.lock();
        let remaining = match state.connections.get_mut(share) {
            Some(conn) if conn.serial == serial => conn.decrement_use(share),
            _ => panic!(
                "lease released for shared connection {} #{} which is no longer pooled",
                share, serial
            ),
        };
        debug!(share, serial, use_count = remaining, "released connection lease");
        if remaining == 0 {
            // disconnect while still holding the lock
            state.connections.remove(share);
            debug!(share, serial, "closed shared connection");
        }
    }
}

/// Reference-counted pool of share connections.
///
/// Cheap to clone; clones share the same pool. Create one in the
/// composition root and hand it to everything that touches remote paths.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(connector: impl ShareConnector + 'static) -> Self {
        Self::with_connector(Box::new(connector))
    }

    pub fn with_connector(connector: Box<dyn ShareConnector>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    connections: HashMap::new(),
                    next_serial: 1,
                }),
                connector,
            }),
        }
    }

    /// Lease a connection for `path`, connecting to its share if no lease
    /// is currently held on it.
    ///
    /// A connect failure does not fail the call: the path may still be
    /// reachable without explicit credentials. The failure is available
    /// from [`ConnectionLease::error_message`] and is kept until the entry
    /// is closed.
    pub fn get_connection(
        &self,
        user: Option<&str>,
        password: Option<&str>,
        path: &str,
    ) -> Result<ConnectionLease, PoolError> {
        let share = canonical_share_path(path)?;

        let mut guard = self.inner.state.lock();
        let PoolState {
            connections,
            next_serial,
        } = &mut *guard;

        let conn = match connections.entry(share.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let serial = *next_serial;
                *next_serial += 1;

                let mut error_message = None;
                let mut session = None;
                if share != LOCAL_SHARE {
                    if let (Some(user), Some(password)) = (user, password) {
                        match self.inner.connector.connect(&share, user, password) {
                            Ok(s) => session = Some(s),
                            Err(e) => {
                                warn!(share = %share, "connect failed, continuing without it: {:#}", e);
                                error_message = Some(format!("{:#}", e));
                            }
                        }
                    }
                }

                debug!(share = %share, serial, "opened shared connection");
                entry.insert(SharedConnection {
                    serial,
                    use_count: 0,
                    error_message,
                    _session: session,
                })
            }
        };
        conn.increment_use();
        debug!(share = %share, serial = conn.serial, use_count = conn.use_count, "leased connection");

        Ok(ConnectionLease {
            pool: Arc::clone(&self.inner),
            share_path: share,
            serial: conn.serial,
            error_message: conn.error_message.clone(),
            released: false,
        })
    }

    /// Give a lease back. Equivalent to dropping it.
    pub fn release(&self, lease: ConnectionLease) {
        debug_assert!(
            Arc::ptr_eq(&self.inner, &lease.pool),
            "lease returned to a pool that did not issue it"
        );
        let mut lease = lease;
        lease.release();
    }

    /// Current lease count for the share `path` belongs to, if pooled.
    pub fn use_count(&self, path: &str) -> Option<usize> {
        let share = canonical_share_path(path).ok()?;
        self.inner
            .state
            .lock()
            .connections
            .get(&share)
            .map(|c| c.use_count)
    }

    /// Number of open shared connections.
    pub fn len(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(NoopConnector)
    }
}

/// A claim on one pooled connection, released exactly once.
///
/// Released by [`ConnectionLease::release`], [`ConnectionPool::release`], or
/// on drop, whichever comes first.
pub struct ConnectionLease {
    pool: Arc<PoolInner>,
    share_path: String,
    serial: u64,
    error_message: Option<String>,
    released: bool,
}

impl ConnectionLease {
    /// Canonical share this lease is held on.
    pub fn share_path(&self) -> &str {
        &self.share_path
    }

    /// Identity of the pooled connection. A share that was closed and
    /// reopened gets a new serial.
    pub fn connection_serial(&self) -> u64 {
        self.serial
    }

    /// Connect error recorded when the shared connection was opened.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.pool.release_share(&self.share_path, self.serial);
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("share_path", &self.share_path)
            .field("serial", &self.serial)
            .field("error_message", &self.error_message)
            .field("released", &self.released)
            .finish()
    }
}
