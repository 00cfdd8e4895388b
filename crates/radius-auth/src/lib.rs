//! RADIUS client engine for HTTP Basic-Auth
//!
//! Checks a username and password against one or more RADIUS servers
//! (RFC 2865 Access-Request with a PAP User-Password) over UDP.
//!
//! The engine itself ([`TransactionManager`]) is single-threaded and does no
//! waiting: the host hands it received datagrams and the current time and
//! collects completions. [`RadiusClient`] is the Tokio host for it.
//!
//! # Example
//!
//! ```no_run
//! use radius_auth::{AuthOutcome, Config, RadiusClient, ServerConfig};
//!
//! # async fn check() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::new(ServerConfig::new("192.0.2.10", "testing123"));
//! let client = RadiusClient::start(&config)?;
//!
//! match client.authenticate("alice", "hunter2").await? {
//!     AuthOutcome::Accepted => println!("welcome"),
//!     outcome => println!("denied: {}", outcome),
//! }
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod pool;
pub mod registry;
pub mod server;
pub mod transaction;

pub use client::{ClientError, RadiusClient, ServerSnapshot};
pub use config::{Config, ConfigError, RetryPolicy, ServerConfig};
pub use pool::{POOL_CAPACITY, PoolExhausted, RequestSlot, SlotPool};
pub use registry::{RegistryError, ServerRegistry};
pub use server::{DatagramSocket, Server, ServerId, ServerStats};
pub use transaction::{
    AuthHandle, AuthOutcome, AuthStatus, Completion, EngineSettings, TransactionManager,
    TransactionState,
};
