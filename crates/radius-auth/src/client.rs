//! Tokio front end for the transaction engine
//!
//! [`RadiusClient::start`] opens one connected UDP socket per server, spawns
//! a reader task per socket and a single worker task that owns the
//! [`TransactionManager`]. Every engine call happens on the worker, one
//! event at a time: commands from client handles, datagrams from the
//! readers, and the earliest response timer. Completions are handed to
//! waiting callers only after the event that produced them has been fully
//! processed.

use crate::config::Config;
use crate::registry::{RegistryError, ServerRegistry};
use crate::server::{DatagramSocket, ServerId, ServerStats};
use crate::transaction::{
    AuthHandle, AuthOutcome, AuthStatus, Completion, EngineSettings, TransactionManager,
};
use radius_proto::MAX_PACKET_SIZE;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const COMMAND_QUEUE: usize = 1024;
const EVENT_QUEUE: usize = 1024;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("RADIUS client has shut down")]
    Closed,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Point-in-time view of one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub id: ServerId,
    pub name: String,
    pub address: SocketAddr,
    pub in_flight: usize,
    pub stats: ServerStats,
}

enum Command {
    Submit {
        username: Vec<u8>,
        password: Vec<u8>,
        reply: oneshot::Sender<AuthHandle>,
        waiter: Option<oneshot::Sender<AuthOutcome>>,
    },
    Poll {
        handle: AuthHandle,
        reply: oneshot::Sender<Option<AuthStatus>>,
    },
    Abort {
        handle: AuthHandle,
        reply: Option<oneshot::Sender<bool>>,
    },
    Stats {
        reply: oneshot::Sender<Vec<ServerSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Event {
    Datagram { server: ServerId, datagram: Vec<u8> },
    ReceiveFailed { server: ServerId, error: io::Error },
}

/// Handle to a running RADIUS client. Cheap to clone; the worker stops once
/// [`shutdown`](Self::shutdown) is called or every handle is dropped.
#[derive(Clone)]
pub struct RadiusClient {
    commands: mpsc::Sender<Command>,
    busy_retry_delay: Duration,
}

impl RadiusClient {
    /// Open every server socket and start the worker
    ///
    /// Must be called from within a Tokio runtime. Fails without leaving any
    /// socket open when one of the servers cannot be reached.
    pub fn start(config: &Config) -> Result<Self, ClientError> {
        let mut registry = ServerRegistry::from_config(config)?;
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let mut readers = Vec::with_capacity(registry.len());

        let opened = registry.open_all(|server| {
            let (receiver, sender) = connect_udp(server.address)?;
            debug!(server = %server.name, address = %server.address, "Server socket connected");
            readers.push(spawn_reader(server.id, receiver, event_tx.clone()));
            Ok(Arc::new(sender) as Arc<dyn DatagramSocket>)
        });
        if let Err(e) = opened {
            for reader in readers {
                reader.abort();
            }
            return Err(e.into());
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let worker = Worker {
            engine: TransactionManager::new(registry, EngineSettings::from(config)),
            commands: command_rx,
            events: event_rx,
            waiters: HashMap::new(),
            readers,
        };
        tokio::spawn(worker.run());

        info!(
            servers = config.servers.len(),
            timeout_ms = config.timeout_ms,
            attempts = config.attempts,
            retry_policy = ?config.retry_policy,
            "RADIUS client started"
        );

        Ok(RadiusClient {
            commands: command_tx,
            busy_retry_delay: config.busy_retry_delay(),
        })
    }

    /// Start a transaction and return its handle without waiting for it
    pub async fn submit(
        &self,
        username: impl AsRef<[u8]>,
        password: impl AsRef<[u8]>,
    ) -> Result<AuthHandle, ClientError> {
        let (username, password) = (username.as_ref().to_vec(), password.as_ref().to_vec());
        self.request(|reply| Command::Submit {
            username,
            password,
            reply,
            waiter: None,
        })
        .await
    }

    /// Status of a transaction started with [`submit`](Self::submit).
    /// A `Done` status is reported once; afterwards the handle is unknown.
    pub async fn poll(&self, handle: AuthHandle) -> Result<Option<AuthStatus>, ClientError> {
        self.request(|reply| Command::Poll { handle, reply }).await
    }

    /// Cancel a transaction; returns `false` for an unknown handle
    pub async fn abort(&self, handle: AuthHandle) -> Result<bool, ClientError> {
        self.request(|reply| Command::Abort {
            handle,
            reply: Some(reply),
        })
        .await
    }

    /// Check a username and password, waiting for the final outcome
    ///
    /// While every request identifier is in flight the request is
    /// resubmitted after the configured busy delay, so `Busy` is never
    /// returned. Dropping the future aborts the transaction.
    pub async fn authenticate(
        &self,
        username: impl AsRef<[u8]>,
        password: impl AsRef<[u8]>,
    ) -> Result<AuthOutcome, ClientError> {
        let (username, password) = (username.as_ref(), password.as_ref());

        loop {
            let (waiter, outcome) = oneshot::channel();
            let handle = self
                .request(|reply| Command::Submit {
                    username: username.to_vec(),
                    password: password.to_vec(),
                    reply,
                    waiter: Some(waiter),
                })
                .await?;

            let guard = AbortOnDrop {
                handle,
                commands: self.commands.clone(),
                armed: true,
            };
            let outcome = outcome.await.map_err(|_| ClientError::Closed)?;
            guard.disarm();

            if outcome != AuthOutcome::Busy {
                return Ok(outcome);
            }

            debug!(
                handle = %handle,
                delay_ms = self.busy_retry_delay.as_millis() as u64,
                "All request identifiers busy, resubmitting"
            );
            tokio::time::sleep(self.busy_retry_delay).await;
        }
    }

    /// Counters and in-flight requests per server
    pub async fn stats(&self) -> Result<Vec<ServerSnapshot>, ClientError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Fail every pending transaction as `Errored`, close all sockets and
    /// stop the worker
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)
    }
}

/// Aborts an `authenticate` transaction whose future is dropped early
struct AbortOnDrop {
    handle: AuthHandle,
    commands: mpsc::Sender<Command>,
    armed: bool,
}

impl AbortOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.try_send(Command::Abort {
                handle: self.handle,
                reply: None,
            });
        }
    }
}

struct Worker {
    engine: TransactionManager,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<Event>,
    waiters: HashMap<AuthHandle, oneshot::Sender<AuthOutcome>>,
    readers: Vec<JoinHandle<()>>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let deadline = self.engine.next_deadline();

            tokio::select! {
                command = self.commands.recv() => {
                    let running = match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            self.stop();
                            false
                        }
                    };
                    if !running {
                        break;
                    }
                }
                Some(event) = self.events.recv() => self.handle_event(event),
                _ = sleep_until(deadline) => {
                    self.engine.expire_timers(Instant::now().into_std());
                }
            }

            self.deliver_completions();
        }

        info!("RADIUS client stopped");
    }

    /// Returns `false` once the worker should exit
    fn handle_command(&mut self, command: Command) -> bool {
        let now = Instant::now().into_std();
        match command {
            Command::Submit {
                username,
                password,
                reply,
                waiter,
            } => {
                let handle = self.engine.submit(&username, &password, now);
                let delivered = reply.send(handle).is_ok();
                match waiter {
                    Some(waiter) if delivered && !waiter.is_closed() => {
                        self.waiters.insert(handle, waiter);
                    }
                    Some(_) => self.abandon(handle),
                    None if !delivered => self.abandon(handle),
                    None => {}
                }
            }
            Command::Poll { handle, reply } => {
                let _ = reply.send(self.engine.poll(handle));
            }
            Command::Abort { handle, reply } => {
                self.waiters.remove(&handle);
                let aborted = self.engine.abort(handle);
                if let Some(reply) = reply {
                    let _ = reply.send(aborted);
                }
            }
            Command::Stats { reply } => {
                let snapshots = self
                    .engine
                    .registry()
                    .iter()
                    .map(|server| ServerSnapshot {
                        id: server.id,
                        name: server.name.clone(),
                        address: server.address,
                        in_flight: server.pool().in_flight(),
                        stats: server.stats(),
                    })
                    .collect();
                let _ = reply.send(snapshots);
            }
            Command::Shutdown { reply } => {
                self.stop();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Datagram { server, datagram } => self.engine.on_datagram(server, &datagram),
            Event::ReceiveFailed { server, error } => self.engine.on_receive_error(server, &error),
        }
    }

    /// Caller went away before its handle or outcome could be delivered
    fn abandon(&mut self, handle: AuthHandle) {
        if self.engine.abort(handle) {
            debug!(handle = %handle, "Caller gone, transaction aborted");
        }
    }

    fn deliver_completions(&mut self) {
        // an `authenticate` future dropped without its abort reaching us
        let engine = &mut self.engine;
        self.waiters.retain(|handle, waiter| {
            if waiter.is_closed() {
                engine.abort(*handle);
                false
            } else {
                true
            }
        });

        while let Some(Completion { handle, outcome }) = self.engine.pop_completion() {
            if let Some(waiter) = self.waiters.remove(&handle) {
                let _ = waiter.send(outcome);
                self.engine.forget(handle);
            }
        }
    }

    fn stop(&mut self) {
        self.engine.shutdown();
        self.deliver_completions();
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

/// Resolves at `deadline`, or never when no timer is armed
async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Non-blocking UDP socket bound to an ephemeral port and connected to
/// `address`, so the kernel filters out datagrams from other peers
///
/// Returns the Tokio-registered receive half and a clone of the same
/// descriptor for sending. Sends on the clone go straight to the kernel, so
/// the first datagram does not wait for the reactor to report writability.
fn connect_udp(address: SocketAddr) -> io::Result<(UdpSocket, std::net::UdpSocket)> {
    let local: SocketAddr = match address {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = std::net::UdpSocket::bind(local)?;
    socket.connect(address)?;
    socket.set_nonblocking(true)?;
    let sender = socket.try_clone()?;
    Ok((UdpSocket::from_std(socket)?, sender))
}

fn spawn_reader(
    server: ServerId,
    socket: UdpSocket,
    events: mpsc::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // one spare byte exposes datagrams larger than the protocol allows
        let mut buffer = vec![0u8; MAX_PACKET_SIZE + 1];
        loop {
            let event = match socket.recv(&mut buffer).await {
                Ok(len) => Event::Datagram {
                    server,
                    datagram: buffer[..len].to_vec(),
                },
                Err(error) => Event::ReceiveFailed { server, error },
            };
            if events.send(event).await.is_err() {
                warn!(server = %server, "Engine gone, stopping reader");
                break;
            }
        }
    })
}
