// Seriallog Kernel
//
// Bridges line-oriented serial sensor output into a remote
// append-only log.

pub mod bridge;
pub mod config;
pub mod invariants;
pub mod log;
pub mod record;
pub mod serial;
pub mod state;

pub use bridge::{Bridge, BridgeError, BridgeObserver, BridgeReport, EndReason, TracingObserver};
pub use config::BridgeConfig;
