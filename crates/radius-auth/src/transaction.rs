//! Authentication transactions
//!
//! The [`TransactionManager`] owns the server registry and every pending
//! transaction. It performs no I/O of its own beyond non-blocking sends on
//! the server sockets and never reads the clock: the host feeds it received
//! datagrams ([`on_datagram`](TransactionManager::on_datagram)) and the
//! current time ([`expire_timers`](TransactionManager::expire_timers)), and
//! collects finished transactions with
//! [`pop_completion`](TransactionManager::pop_completion).
//!
//! ```text
//! Started -> AwaitingResponse -> Retrying -> AwaitingResponse -> ... -> Done(outcome)
//! ```

use crate::config::{Config, RetryPolicy};
use crate::registry::ServerRegistry;
use crate::server::{ServerId, ServerStats};
use radius_proto::codec::{
    AccessRequest, DecodeError, ResponseKind, decode_response, encode_access_request, read_header,
};
use radius_proto::generate_request_authenticator;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Caller-visible reference to one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuthHandle(pub u64);

impl fmt::Display for AuthHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "auth-{}", self.0)
    }
}

/// Final result of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The server sent an authenticated Access-Accept
    Accepted,
    /// The server sent an authenticated Access-Reject (or another
    /// authenticated verdict that is not an accept)
    Rejected,
    /// Every attempt went unanswered
    TimedOut,
    /// The request could not be built or sent
    Errored,
    /// No request identifier was free; the caller may resubmit later
    Busy,
}

impl fmt::Display for AuthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthOutcome::Accepted => "accepted",
            AuthOutcome::Rejected => "rejected",
            AuthOutcome::TimedOut => "timed out",
            AuthOutcome::Errored => "errored",
            AuthOutcome::Busy => "busy",
        };
        f.write_str(name)
    }
}

/// What [`TransactionManager::poll`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Pending,
    Done(AuthOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Started,
    AwaitingResponse,
    Retrying,
    Done(AuthOutcome),
}

impl TransactionState {
    pub fn is_done(&self) -> bool {
        matches!(self, TransactionState::Done(_))
    }
}

/// Notification that a transaction reached `Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub handle: AuthHandle,
    pub outcome: AuthOutcome,
}

/// Engine-wide defaults for new transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// How long to wait for each response
    pub timeout: Duration,
    /// Requests sent per server before giving up on it
    pub attempts: u32,
    pub retry_policy: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            timeout: Duration::from_secs(60),
            attempts: 3,
            retry_policy: RetryPolicy::SameServer,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        EngineSettings {
            timeout: config.timeout(),
            attempts: config.attempts,
            retry_policy: config.retry_policy,
        }
    }
}

struct Transaction {
    username: Vec<u8>,
    password: Vec<u8>,
    timeout: Duration,
    attempts: u32,
    attempts_remaining: u32,
    /// Servers still available for failover after the current one
    servers_remaining: usize,
    state: TransactionState,
    /// Server and slot identifier while the transaction holds a slot
    current: Option<(ServerId, u8)>,
}

impl Transaction {
    fn clear_credentials(&mut self) {
        self.username.fill(0);
        self.password.fill(0);
        self.username.clear();
        self.password.clear();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"<redacted>")
            .field("attempts_remaining", &self.attempts_remaining)
            .field("servers_remaining", &self.servers_remaining)
            .field("state", &self.state)
            .field("current", &self.current)
            .finish()
    }
}

/// Drives every transaction of one engine instance
#[derive(Debug)]
pub struct TransactionManager {
    registry: ServerRegistry,
    settings: EngineSettings,
    transactions: HashMap<AuthHandle, Transaction>,
    /// Armed response timers, ordered by deadline
    timers: BTreeSet<(Instant, ServerId, u8)>,
    completions: VecDeque<Completion>,
    next_handle: u64,
}

impl TransactionManager {
    pub fn new(registry: ServerRegistry, settings: EngineSettings) -> Self {
        TransactionManager {
            registry,
            settings,
            transactions: HashMap::new(),
            timers: BTreeSet::new(),
            completions: VecDeque::new(),
            next_handle: 1,
        }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Start a transaction with the engine's timeout and attempts
    pub fn submit(&mut self, username: &[u8], password: &[u8], now: Instant) -> AuthHandle {
        let (timeout, attempts) = (self.settings.timeout, self.settings.attempts);
        self.submit_with(username, password, timeout, attempts, now)
    }

    /// Start a transaction
    ///
    /// The returned handle is always valid. When no request identifier is
    /// free the transaction is already `Done(Busy)`; when the first send
    /// fails it is already `Done(Errored)`.
    pub fn submit_with(
        &mut self,
        username: &[u8],
        password: &[u8],
        timeout: Duration,
        attempts: u32,
        now: Instant,
    ) -> AuthHandle {
        let handle = AuthHandle(self.next_handle);
        self.next_handle += 1;

        let attempts = attempts.max(1);
        let candidates = match self.settings.retry_policy {
            RetryPolicy::SameServer => 1,
            RetryPolicy::Failover => self.registry.len(),
        };

        self.transactions.insert(
            handle,
            Transaction {
                username: username.to_vec(),
                password: password.to_vec(),
                timeout,
                attempts,
                attempts_remaining: attempts,
                servers_remaining: 0,
                state: TransactionState::Started,
                current: None,
            },
        );

        match self.acquire_slot(handle, ServerId(0), candidates) {
            Some((server, id, remaining)) => {
                if let Some(tx) = self.transactions.get_mut(&handle) {
                    tx.servers_remaining = remaining;
                    tx.current = Some((server, id));
                }
                self.transmit(handle, server, id, now);
            }
            None => {
                debug!(handle = %handle, "No free request identifier");
                self.finish(handle, AuthOutcome::Busy);
            }
        }

        handle
    }

    /// Current status of a transaction, or `None` for an unknown handle
    ///
    /// Reporting `Done` consumes the transaction: its record and any queued
    /// completion for it are discarded.
    pub fn poll(&mut self, handle: AuthHandle) -> Option<AuthStatus> {
        let state = self.transactions.get(&handle)?.state;
        match state {
            TransactionState::Done(outcome) => {
                self.forget(handle);
                Some(AuthStatus::Done(outcome))
            }
            _ => Some(AuthStatus::Pending),
        }
    }

    pub fn state(&self, handle: AuthHandle) -> Option<TransactionState> {
        self.transactions.get(&handle).map(|tx| tx.state)
    }

    /// Discard a finished transaction once its outcome has been delivered
    pub fn forget(&mut self, handle: AuthHandle) {
        if self
            .transactions
            .get(&handle)
            .is_some_and(|tx| tx.state.is_done())
        {
            self.transactions.remove(&handle);
            self.completions.retain(|c| c.handle != handle);
        }
    }

    /// Cancel a transaction
    ///
    /// The timer is disarmed, the slot released and no completion will be
    /// reported for it. Returns `false` for an unknown handle.
    pub fn abort(&mut self, handle: AuthHandle) -> bool {
        let Some(tx) = self.transactions.remove(&handle) else {
            return false;
        };

        if let Some((server, id)) = tx.current {
            self.release_slot(server, id);
            debug!(handle = %handle, server = %server, identifier = id, "Transaction aborted");
        }
        self.completions.retain(|c| c.handle != handle);
        true
    }

    /// Handle a datagram received on `server`'s socket
    ///
    /// Anything that is not an authenticated answer to an active request is
    /// dropped without touching any transaction or timer.
    pub fn on_datagram(&mut self, server: ServerId, datagram: &[u8]) {
        let Some(srv) = self.registry.resolve_mut(server) else {
            return;
        };

        let header = match read_header(datagram) {
            Ok(header) => header,
            Err(e) => {
                srv.stats.record_dropped();
                debug!(server = %srv.name, error = %e, "Dropping malformed datagram");
                return;
            }
        };

        let Some((handle, authenticator)) = srv
            .pool
            .active_slot(header.identifier)
            .and_then(|slot| slot.owner.map(|owner| (owner, slot.authenticator)))
        else {
            srv.stats.record_dropped();
            debug!(
                server = %srv.name,
                identifier = header.identifier,
                "Dropping response with no active request"
            );
            return;
        };

        let outcome = match decode_response(datagram, header.identifier, &authenticator, srv.secret())
        {
            Ok(response) => {
                if let Some(message) = response.reply_message() {
                    debug!(server = %srv.name, handle = %handle, reply_message = %message, "Reply-Message");
                }
                match response.kind {
                    ResponseKind::Accept => {
                        srv.stats.record_accept();
                        AuthOutcome::Accepted
                    }
                    ResponseKind::Reject => {
                        srv.stats.record_reject();
                        AuthOutcome::Rejected
                    }
                }
            }
            Err(DecodeError::UnexpectedCode(code)) => {
                warn!(
                    server = %srv.name,
                    handle = %handle,
                    code = code,
                    "Authenticated response with unsupported code, treating as reject"
                );
                srv.stats.record_reject();
                AuthOutcome::Rejected
            }
            Err(e) => {
                srv.stats.record_dropped();
                debug!(
                    server = %srv.name,
                    identifier = header.identifier,
                    error = %e,
                    "Dropping invalid response"
                );
                return;
            }
        };

        self.finish(handle, outcome);
    }

    /// Handle the expiry of the response timer for `id` on `server`
    ///
    /// With attempts left the request is re-sent from the same slot under a
    /// fresh authenticator. Otherwise the failover policy may move the
    /// transaction to another server; failing that it ends `TimedOut`.
    pub fn on_timeout(&mut self, server: ServerId, id: u8, now: Instant) {
        let Some(srv) = self.registry.resolve_mut(server) else {
            return;
        };
        let Some((handle, deadline)) = srv
            .pool
            .active_slot(id)
            .and_then(|slot| Some((slot.owner?, slot.deadline?)))
        else {
            return;
        };

        self.timers.remove(&(deadline, server, id));
        srv.pool.slot_mut(id).deadline = None;
        srv.stats.record_timeout();

        let Some(tx) = self.transactions.get_mut(&handle) else {
            return;
        };
        if tx.state.is_done() {
            return;
        }

        tx.attempts_remaining = tx.attempts_remaining.saturating_sub(1);
        if tx.attempts_remaining > 0 {
            tx.state = TransactionState::Retrying;
            debug!(
                server = %srv.name,
                handle = %handle,
                identifier = id,
                attempts_remaining = tx.attempts_remaining,
                "No response, retrying"
            );
            self.transmit(handle, server, id, now);
            return;
        }

        let candidates = tx.servers_remaining;
        if candidates == 0 {
            self.finish(handle, AuthOutcome::TimedOut);
            return;
        }

        // fail over: give the slot back before taking one elsewhere
        tx.current = None;
        self.release_slot(server, id);

        let start = self.registry.next(server);
        match self.acquire_slot(handle, start, candidates) {
            Some((next, next_id, remaining)) => {
                if let Some(tx) = self.transactions.get_mut(&handle) {
                    tx.servers_remaining = remaining;
                    tx.attempts_remaining = tx.attempts;
                    tx.state = TransactionState::Retrying;
                    tx.current = Some((next, next_id));
                }
                info!(handle = %handle, from = %server, to = %next, "Failing over to next server");
                self.transmit(handle, next, next_id, now);
            }
            None => self.finish(handle, AuthOutcome::TimedOut),
        }
    }

    /// Fire every response timer due at `now`
    pub fn expire_timers(&mut self, now: Instant) {
        let mut expired = Vec::new();
        while let Some(&entry) = self.timers.first() {
            if entry.0 > now {
                break;
            }
            self.timers.pop_first();
            expired.push(entry);
        }

        for (_, server, id) in expired {
            self.on_timeout(server, id, now);
        }
    }

    /// Earliest armed response timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.first().map(|&(deadline, _, _)| deadline)
    }

    /// Next queued notification, in completion order
    pub fn pop_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }

    /// Transactions not yet `Done`
    pub fn in_flight(&self) -> usize {
        self.transactions
            .values()
            .filter(|tx| !tx.state.is_done())
            .count()
    }

    pub fn stats(&self, server: ServerId) -> Option<ServerStats> {
        self.registry.resolve(server).map(|srv| srv.stats())
    }

    /// Finish every pending transaction as `Errored`, then close all sockets
    /// and drain all pools
    pub fn shutdown(&mut self) {
        let pending: Vec<AuthHandle> = self
            .transactions
            .iter()
            .filter(|(_, tx)| !tx.state.is_done())
            .map(|(&handle, _)| handle)
            .collect();

        for handle in pending {
            self.finish(handle, AuthOutcome::Errored);
        }

        let orphans = self.registry.close_all();
        if !orphans.is_empty() {
            warn!(count = orphans.len(), "Request slots still held at shutdown");
        }
        self.timers.clear();

        for server in self.registry.iter() {
            let stats = server.stats();
            info!(
                server = %server.name,
                requests_sent = stats.requests_sent,
                accepts = stats.accepts,
                rejects = stats.rejects,
                timeouts = stats.timeouts,
                dropped = stats.dropped,
                send_errors = stats.send_errors,
                recv_errors = stats.recv_errors,
                "RADIUS server statistics"
            );
        }
    }

    /// Count a receive failure on `server`'s socket
    pub fn on_receive_error(&mut self, server: ServerId, error: &io::Error) {
        if let Some(srv) = self.registry.resolve_mut(server) {
            srv.stats.record_recv_error();
            warn!(server = %srv.name, error = %error, "Receive failed");
        }
    }

    /// Walk up to `candidates` servers from `start` and take a slot from the
    /// first one with a free identifier. Returns the server, the identifier
    /// and how many candidates are left after the chosen one.
    fn acquire_slot(
        &mut self,
        handle: AuthHandle,
        start: ServerId,
        mut candidates: usize,
    ) -> Option<(ServerId, u8, usize)> {
        let mut server = start;
        while candidates > 0 {
            candidates -= 1;
            if let Some(srv) = self.registry.resolve_mut(server)
                && let Ok(id) = srv.pool.acquire(handle)
            {
                return Some((server, id, candidates));
            }
            server = self.registry.next(server);
        }
        None
    }

    /// Encode and send the current attempt from `id` with a fresh
    /// authenticator, then arm its timer
    fn transmit(&mut self, handle: AuthHandle, server: ServerId, id: u8, now: Instant) {
        let (Some(tx), Some(srv)) = (
            self.transactions.get_mut(&handle),
            self.registry.resolve_mut(server),
        ) else {
            return;
        };

        let authenticator = generate_request_authenticator();
        let request = AccessRequest {
            identifier: id,
            authenticator,
            username: &tx.username,
            password: &tx.password,
            nas_identifier: srv.nas_identifier(),
        };

        let sent = match encode_access_request(&request, srv.secret()) {
            Ok(datagram) => match srv.send(&datagram) {
                Ok(()) => {
                    srv.stats.record_request();
                    true
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // lost like any dropped datagram; the response timer retries it
                    srv.stats.record_send_error();
                    debug!(server = %srv.name, handle = %handle, "Send buffer full, Access-Request dropped");
                    true
                }
                Err(e) => {
                    srv.stats.record_send_error();
                    warn!(server = %srv.name, handle = %handle, error = %e, "Failed to send Access-Request");
                    false
                }
            },
            Err(e) => {
                warn!(handle = %handle, error = %e, "Failed to encode Access-Request");
                false
            }
        };

        if !sent {
            self.finish(handle, AuthOutcome::Errored);
            return;
        }

        let deadline = now + tx.timeout;
        let slot = srv.pool.slot_mut(id);
        slot.authenticator = authenticator;
        slot.deadline = Some(deadline);
        self.timers.insert((deadline, server, id));

        tx.state = TransactionState::AwaitingResponse;
        debug!(
            server = %srv.name,
            handle = %handle,
            identifier = id,
            attempts_remaining = tx.attempts_remaining,
            "Access-Request sent"
        );
    }

    /// Move a transaction to `Done`, release its slot and queue the
    /// completion. A transaction already `Done` is left untouched.
    fn finish(&mut self, handle: AuthHandle, outcome: AuthOutcome) {
        let Some(tx) = self.transactions.get_mut(&handle) else {
            return;
        };
        if tx.state.is_done() {
            return;
        }

        tx.state = TransactionState::Done(outcome);
        tx.clear_credentials();
        if let Some((server, id)) = tx.current.take() {
            self.release_slot(server, id);
        }

        info!(handle = %handle, outcome = %outcome, "Authentication finished");
        self.completions.push_back(Completion { handle, outcome });
    }

    fn release_slot(&mut self, server: ServerId, id: u8) {
        if let Some(srv) = self.registry.resolve_mut(server) {
            if let Some(deadline) = srv.pool.slot(id).deadline {
                self.timers.remove(&(deadline, server, id));
            }
            srv.pool.release(id);
        }
    }
}
