pub mod types;
pub mod client;
pub mod simulated;

pub use types::*;
pub use client::{AlwaysOnline, BackendClient, ClientFactory, ConnectivityMonitor};
pub use simulated::{SimulatedBackend, SimulatedClient};
