//! Topic-based, type-routed publish/subscribe message bus.

pub mod bus;
pub mod delayed;
pub mod message;
pub mod subscriber;
pub mod type_map;

pub use bus::{BusBackend, LocalBusBackend, MessageBus};
pub use message::{Envelope, PublishOptions};
pub use subscriber::{HandlerFuture, SubscriptionHandle, TypedHandler, UniversalHandler};
pub use type_map::TypeRegistry;
