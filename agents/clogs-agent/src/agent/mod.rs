//! Agent module
//!
//! Identity lifecycle, the heartbeat service and the interval scheduling
//! shared by the long-running service loops.

pub mod heartbeat;
pub mod identity;
pub mod schedule;
