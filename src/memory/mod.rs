//! Memory access: what the heads read from and write to the bank.
//!
//! - **Read**: a weighted sum of rows of the incoming bank, one vector per head
//! - **Write**: every head erases multiplicatively, then adds, producing a new bank

pub mod read;
pub mod write;
