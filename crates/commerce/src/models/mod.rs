//! Domain models for the commerce core.
//!
//! These types represent validated domain objects separate from database row
//! types. All writes go through the services in [`crate::services`]; nothing
//! outside them mutates an order child in isolation.

pub mod order;
pub mod session;

pub use order::{Order, OrderAddress, OrderItem, OrderPayment, TransitionError};
pub use session::{Session, SessionClient};
