//! Token Login Plugin - NuGet plugin protocol host for the token credential
//! provider.
//!
//! The package-manager client starts the plugin with `-Plugin` and talks to
//! it over stdin/stdout. [`PluginHost`] runs that session: it negotiates the
//! protocol version, dispatches requests to the [`handlers`], and keeps the
//! redacting logger wired to the connection until the client closes it.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod connection;
pub mod error;
pub mod handlers;
pub mod host;
pub mod protocol;

pub use connection::{Connection, ConnectionOptions};
pub use error::{ProtocolError, ProtocolResult};
pub use handlers::{HandlerRegistry, RequestHandler, ResponseTiming};
pub use host::{PluginHost, validate_activation};
pub use protocol::{Message, MessageMethod, MessageType};
