mod delivery_logs;
mod stats;
mod subscriptions;

pub use delivery_logs::*;
pub use stats::*;
pub use subscriptions::*;
