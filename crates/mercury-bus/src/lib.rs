//! In-process typed pub/sub event bus.
//!
//! Every cross-component interaction in the system goes through this bus;
//! no component imports another concrete component. Topics are dotted
//! paths (`market.orderbook.<market_id>`), subscriptions match exactly or
//! with a single trailing wildcard segment, and each subscription gets a
//! dedicated delivery task so one slow handler never blocks publishers or
//! other subscribers.

pub mod bus;
pub mod error;
pub mod pattern;

pub use bus::{BoxFuture, BrokerBackend, EventBus, Handler, SubscriptionId};
pub use error::{BusError, BusResult};
pub use pattern::TopicPattern;
