//! Loss seeding and gradient verification.
//!
//! - **Loss**: a fixed linear loss over every circuit output, used to seed
//!   output gradients
//! - **Gradcheck**: central finite differences against the analytic backward
//!   pass, for one circuit or a whole unrolled sequence

pub mod gradcheck;
pub mod loss;
