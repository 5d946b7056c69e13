//! cobus-core: packet model, backend contract, dispatcher and wire formats.
//! Everything here is synchronous; the TCP broker lives in `cobus-broker`.

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod ethernet;
pub mod message;
pub mod packet;
pub mod postman;
pub mod wire;

pub use backend::{Backend, BackendError};
pub use dispatcher::Dispatcher;
pub use message::Message;
pub use packet::{Header, Packet, PacketType, Payload};
pub use postman::{ActionTable, DeliverInfo, Postman};
pub use wire::{MessageKind, WireError};
