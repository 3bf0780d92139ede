//! Commerce services.
//!
//! Entry points for everything that mutates sessions or orders. The
//! single-writer discipline lives here: no caller outside these services
//! touches an order child or a session record directly.

pub mod auth;
pub mod orders;
pub mod sessions;

pub use auth::{AuthError, LoginOutcome, LoginService};
pub use orders::{
    CreateOrderRequest, ItemStatusResult, NewOrderAddress, NewOrderLine, OrderError, OrderService,
};
pub use sessions::{SessionError, SessionService};
