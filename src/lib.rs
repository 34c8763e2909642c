//! console-warden - entitlement gate and session-expiry core for the
//! municipal services admin console
//!
//! Two cooperating mechanisms, independent of the backend's own
//! authentication: the [`gate::Gate`] decides whether the console may
//! render at all (with bounded offline tolerance and a manual retry
//! path), and the [`session::SessionMonitor`] forces logout when idle or
//! absolute session limits are exceeded, consistently across windows via
//! a shared [`storage::SharedStore`].

pub mod clock;
pub mod config;
pub mod gate;
pub mod obscure;
pub mod session;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GateConfig;
pub use gate::{Gate, GateState};
pub use session::{LogoutHandler, LogoutReason, SessionMonitor, SessionTracker};
pub use storage::{FileStore, MemoryStore, SharedStore};
