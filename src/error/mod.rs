pub mod pubsub;

pub use pubsub::{PubSubError, PubSubResult};
