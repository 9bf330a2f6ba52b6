pub mod defaults;
pub mod live;

pub use live::{LiveHealthCheck, run_live_health_check};
