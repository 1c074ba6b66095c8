//! Core value types: differentiable units, head parameter layout, and the
//! memory state handed from one timestep to the next.

pub mod head;
pub mod state;
pub mod unit;
