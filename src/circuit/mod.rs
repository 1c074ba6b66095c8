//! The memory circuit: one timestep across every head, and the chain of
//! timesteps that backpropagation through time walks in reverse.

pub mod sequence;
pub mod step;
