// gothon: run N copies of a Python program with shared typed variables,
// coordinated over unix datagram sockets by per-variable registers.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod fabric;
pub mod process;
pub mod queue;
pub mod register;
pub mod registry;
pub mod rewriter;
pub mod session;
pub mod shim;
pub mod socket;
pub mod types;

pub use error::{Error, Result};
pub use register::{NAK, SYNC};
pub use session::{Outcome, Session, SessionEvent};
pub use types::{Actions, DefaultValue, Module, Package, Statement, VarKind, Variable};
