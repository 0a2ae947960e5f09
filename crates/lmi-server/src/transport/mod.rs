//! Remote connection adapters for the terminal bridge.

pub mod websocket;
