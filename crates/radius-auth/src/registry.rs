//! Configured servers, in selection order

use crate::config::{Config, ConfigError};
use crate::server::{DatagramSocket, Server, ServerId};
use crate::transaction::AuthHandle;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no RADIUS servers configured")]
    NoServers,
    #[error("failed to open socket for server {server}: {source}")]
    Socket {
        server: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The set of servers the engine talks to, owned by one engine instance
#[derive(Debug)]
pub struct ServerRegistry {
    servers: Vec<Server>,
}

impl ServerRegistry {
    /// Build a registry from configuration; sockets stay closed until
    /// [`open_all`](Self::open_all)
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        if config.servers.is_empty() {
            return Err(RegistryError::NoServers);
        }

        let servers = config
            .servers
            .iter()
            .enumerate()
            .map(|(index, server)| Server::new(ServerId(index), server))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ServerRegistry { servers })
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn resolve(&self, id: ServerId) -> Option<&Server> {
        self.servers.get(id.0)
    }

    pub fn resolve_mut(&mut self, id: ServerId) -> Option<&mut Server> {
        self.servers.get_mut(id.0)
    }

    /// Round-robin successor of `id`
    pub fn next(&self, id: ServerId) -> ServerId {
        ServerId((id.0 + 1) % self.servers.len().max(1))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter()
    }

    /// Whether every server has a socket attached
    pub fn is_open(&self) -> bool {
        self.servers.iter().all(Server::is_open)
    }

    /// Open one socket per server with `connect`
    ///
    /// Either every server ends up with a socket or none does: when
    /// `connect` fails, sockets already attached by this call are detached
    /// again before the error is returned.
    pub fn open_all<F>(&mut self, mut connect: F) -> Result<(), RegistryError>
    where
        F: FnMut(&Server) -> io::Result<Arc<dyn DatagramSocket>>,
    {
        let mut opened = Vec::with_capacity(self.servers.len());
        for index in 0..self.servers.len() {
            if self.servers[index].is_open() {
                continue;
            }

            match connect(&self.servers[index]) {
                Ok(socket) => {
                    self.servers[index].attach(socket);
                    opened.push(index);
                }
                Err(source) => {
                    let server = self.servers[index].name.clone();
                    warn!(server = %server, error = %source, "Failed to open server socket, rolling back");
                    for index in opened {
                        self.servers[index].detach();
                    }
                    return Err(RegistryError::Socket { server, source });
                }
            }
        }

        info!(servers = self.servers.len(), "RADIUS server sockets opened");
        Ok(())
    }

    /// Close every socket and drain every pool, returning the transactions
    /// that still held a slot
    pub fn close_all(&mut self) -> Vec<AuthHandle> {
        let mut orphans = Vec::new();
        for server in &mut self.servers {
            server.detach();
            orphans.extend(server.pool.drain());
        }
        orphans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    struct NullSocket;

    impl DatagramSocket for NullSocket {
        fn try_send(&self, datagram: &[u8]) -> io::Result<usize> {
            Ok(datagram.len())
        }
    }

    fn config(count: usize) -> Config {
        let mut config = Config::new(ServerConfig::new("127.0.0.1:1812", "one"));
        for n in 1..count {
            config
                .servers
                .push(ServerConfig::new(format!("127.0.0.{}:1812", n + 1), "more"));
        }
        config
    }

    #[test]
    fn test_resolve_and_round_robin() {
        let registry = ServerRegistry::from_config(&config(3)).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.resolve(ServerId(2)).unwrap().id, ServerId(2));
        assert!(registry.resolve(ServerId(3)).is_none());
        assert_eq!(registry.next(ServerId(0)), ServerId(1));
        assert_eq!(registry.next(ServerId(2)), ServerId(0));
    }

    #[test]
    fn test_empty_config_rejected() {
        let mut config = config(1);
        config.servers.clear();
        assert!(matches!(
            ServerRegistry::from_config(&config),
            Err(RegistryError::NoServers)
        ));
    }

    #[test]
    fn test_open_all() {
        let mut registry = ServerRegistry::from_config(&config(2)).unwrap();
        assert!(!registry.is_open());
        registry
            .open_all(|_| Ok(Arc::new(NullSocket) as Arc<dyn DatagramSocket>))
            .unwrap();
        assert!(registry.is_open());
    }

    #[test]
    fn test_open_all_rolls_back_on_failure() {
        let mut registry = ServerRegistry::from_config(&config(3)).unwrap();
        let result = registry.open_all(|server| {
            if server.id == ServerId(2) {
                Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "nope"))
            } else {
                Ok(Arc::new(NullSocket) as Arc<dyn DatagramSocket>)
            }
        });

        assert!(matches!(result, Err(RegistryError::Socket { .. })));
        assert!(registry.iter().all(|server| !server.is_open()));
    }

    #[test]
    fn test_close_all_drains_pools() {
        let mut registry = ServerRegistry::from_config(&config(2)).unwrap();
        registry
            .open_all(|_| Ok(Arc::new(NullSocket) as Arc<dyn DatagramSocket>))
            .unwrap();
        registry
            .resolve_mut(ServerId(1))
            .unwrap()
            .pool
            .acquire(AuthHandle(5))
            .unwrap();

        assert_eq!(registry.close_all(), vec![AuthHandle(5)]);
        assert!(registry.iter().all(|server| !server.is_open()));
        assert!(registry.iter().all(|server| server.pool().in_flight() == 0));
    }
}
