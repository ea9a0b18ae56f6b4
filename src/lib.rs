/// Bus lifecycle, application API and backend attachment.
pub mod bus;
/// Bus and logging configuration loading.
pub mod config;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Values, envelopes and the envelope pool.
pub mod message;
/// Value validation against topic metadata.
pub mod meta;
/// Pub/Sub core: topic tree, dispatch, subscribers, correlator, queues.
pub mod pubsub;
/// Topic names, suffixes and classification.
pub mod topic;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Bus handle and backend side.
pub use bus::{Backend, Bus, DevicePort, QueryBuffer};
/// config
pub use config::{BusConfig, Settings};
/// Error types shared by all operations.
pub use gaugebus_error::{BusError, GaugeResult, StackError, StatusCode};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Values and envelopes.
pub use message::{Envelope, EnvelopePool, PoolStats, Value, ValueFlags, ValueRef, ValueType};
/// Metadata validation seam.
pub use meta::{JsonMetaValidator, MetaValidator};
/// Subscribers and their flags.
pub use pubsub::{SubscribeFlags, Subscriber, SubscriberRef};
/// Topics.
pub use topic::{Topic, TopicSuffix};
