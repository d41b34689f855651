/// Settings loading (defaults, file, environment).
pub mod config;
/// Error types of the bus.
pub mod error;
/// Logging setup (filters, formatters).
pub mod logging;
/// Pub/Sub: Broker, Sandbox, Subscription, topic trie.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// config
pub use config::{BrokerConfig, Settings};
/// Operation errors and result types.
pub use error::{PubSubError, PubSubResult};
/// Logging configuration and initialization.
pub use logging::{init_logging, LogFormat, LoggingConfig};
/// Pub/Sub API.
pub use pubsub::{
    Broker, BrokerEvent, CompilerKind, EventKind, FilterCompiler, FilterSpec, ListenerId,
    MessageBus, Meta, Payload, PredicateOnly, QueryCompiler, Sandbox, Subscription,
    SubscriptionId, SubscriptionSnapshot, Topic,
};
