//! Software models of the hardware this crate drives
//!
//! Used by the tests and by `zenreg --simulate`. They check their own
//! preconditions as strictly as the real thing would fail on them, and
//! expose counters and lookups the real hardware does not.

mod fabric;
mod host;
mod ports;
mod vm;

pub use fabric::SimFabric;
pub use host::SimHost;
pub use ports::SimPorts;
pub use vm::{SimArena, SimEarlyVm};
