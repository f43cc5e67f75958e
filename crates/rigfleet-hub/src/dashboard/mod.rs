//! Dashboard broadcast hub: pushes fleet state to authenticated browsers.

mod broadcast;
mod session;

pub use broadcast::{DashboardHub, SubscriberId};
pub use session::DashboardSession;
