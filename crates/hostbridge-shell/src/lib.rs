//! Remote shell channel lifecycle.
//!
//! Provides:
//! - `ConnectionManager` - Open/close/reconnect a shell channel and write to it
//! - `SshConnector` - SSH client running inside a pseudo-terminal
//! - Executable lookup for the SSH client
//! - `LoopbackConnector` - In-memory host (feature: loopback)

mod decode;
pub mod locate;
pub mod manager;
pub mod ssh;

#[cfg(any(test, feature = "loopback"))]
pub mod loopback;

pub use locate::resolve_executable_path;
pub use manager::ConnectionManager;
pub use ssh::SshConnector;
