//! cobus-broker: the TCP broker backend. Holds the broker server with its
//! per-component distributors, and the client with its per-component receivers.

pub mod backend;
pub mod client;
pub mod connection;
pub mod dial;
pub mod distributor;
pub mod error;
pub mod receiver;
pub mod server;

pub use backend::TcpBackend;
pub use client::{Client, ClientOptions, ClientState};
pub use dial::{Dialer, TcpDialer};
pub use error::{ClientError, TransportError};
pub use server::{Registry, Server};
