//! Session orchestration for the terminal bridge.
//!
//! Provides:
//! - `PatternWaiter` - Wait for the first of several prompts, with a deadline
//! - `LoginHandshake` - Bounded sign-in negotiation
//! - `ModeController` - Keystroke routing state machine
//! - `TerminalBridge` - One-way fan-out to the browser terminal
//! - `SessionHandle` - Single-owner session actor

pub mod bridge;
pub mod login;
pub mod mode;
pub mod session;
pub mod waiter;

pub use bridge::TerminalBridge;
pub use login::{LoginAction, LoginHandshake};
pub use mode::{ModeController, Route};
pub use session::SessionHandle;
pub use waiter::{Candidate, CandidateSet, OutputSource, PatternWaiter, WaitMatch};
