//! FieldLink client: session lifecycle, transports and message routing
//! for field units speaking the shared situational event language.
//!
//! The pieces compose top-down: a [`SessionManager`] runs the connect
//! cycle and supervises one live connection at a time; an event
//! multiplexer merges the reliable stream with the optional multicast
//! channel; the chat router and peer table consume inbound events; the
//! presence publisher and outbound dispatcher produce and serialize
//! outbound traffic.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod mux;
pub mod peers;
pub mod publisher;
pub mod router;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::Config;
pub use dispatch::{DispatchHandle, SendRoute};
pub use error::{ClientError, DispatchError, Result};
pub use peers::PeerTable;
pub use publisher::{PresencePublisher, PublishOutcome};
pub use router::{ChatMessage, ChatRouter};
pub use session::{SessionEvent, SessionHandle, SessionManager, SessionState};
pub use telemetry::{CsvSnapshotSource, StaticSource, StatusSnapshot, TelemetrySource};
pub use transport::{Channel, Connector, TcpConnector};
