//! Head addressing: from a key to a sharpened distribution over memory rows.
//!
//! Each head runs the same chain of differentiable stages:
//! - **Similarity**: cosine similarity of the key against every row, scaled by `exp(beta)`
//! - **Content**: max-shifted softmax over the scaled similarities
//! - **Gating**: interpolation with the head's weighting from the previous timestep
//! - **Shift**: continuous circular rotation by `2·sigmoid(s) - 1` rows
//! - **Refocus**: sharpening by `softplus(gamma) + 1` and renormalisation

pub mod chain;
pub mod content;
pub mod gating;
pub mod refocus;
pub mod shift;
pub mod similarity;
