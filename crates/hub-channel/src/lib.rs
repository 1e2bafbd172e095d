//! hub-channel: pub/sub channels on the hubgate actor fabric.
//!
//! A channel keeps an ordered, duplicate-free subscriber set and fans every
//! publish out to it. Subscribers that disappear from the fabric are pruned
//! automatically.

pub mod channel;
pub mod registry;
pub mod store;

pub use channel::{Channel, ChannelMessage, SUBSCRIBE_SUFFIX, UNSUBSCRIBE_SUFFIX};
pub use registry::ChannelRegistry;
pub use store::{MemoryStore, SubscriberStore};
