//! hub-core: shared protocol library for hubgate.
//!
//! Provides the JSON envelope model, codec, schema validation, bare/full
//! addressing, observer notifications, the actor-fabric contract with an
//! in-process implementation, and the abstract frame transport.

pub mod address;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod fabric;
pub mod local;
pub mod notify;
pub mod schema;
pub mod transport;

// Re-export commonly used items at crate root.
pub use address::AddressMode;
pub use envelope::{Envelope, EnvelopeType, PROTOCOL_VERSION};
pub use error::{FabricError, HubError, HubResult};
pub use fabric::{Actor, Delivery, Fabric, Reply, ReplyResult, Response};
pub use local::LocalFabric;
pub use notify::{Notifier, ObserverHandle};
pub use transport::FrameTransport;
