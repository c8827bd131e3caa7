//! Built-in driver families
//!
//! Vendor drivers live out of tree and register themselves through
//! [`crate::driver::register_driver`]. The `mock` driver ships here: an
//! in-memory, fully scriptable implementation of the driver surface used
//! by this crate's tests and by applications that need a stand-in backend.

pub mod mock;

pub use mock::{ConnectMode, MockDriver};
