//! Terminal sessions: process launching, the duplex bridge and durable records.

pub mod bridge;
pub mod handlers;
pub mod pty;
pub mod registry;

pub use bridge::{Bridge, BridgeState};
pub use pty::{Launcher, PtyLauncher};
pub use registry::SessionRegistry;
