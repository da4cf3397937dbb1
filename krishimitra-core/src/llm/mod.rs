//! Provider-agnostic text generation (spec §4.3).
//!
//! The client is polymorphic over provider backends via a tagged variant
//! (spec §9 Design Notes: "replacing dynamic dispatch" — a `match` on the
//! variant at the call site rather than a trait-object hierarchy), mirrored
//! here as [`LLMProvider`] plus one concrete [`LLMClient`] implementation
//! per backend family.

use serde::{Deserialize, Serialize};

pub mod client;
pub mod mock;
pub mod retry;
pub mod rig_client;

pub use client::{GenerateParams, LLMClient, Message, ResponseFormat, Role};
pub use mock::MockLLMClient;
pub use rig_client::RigLLMClient;

/// Provider backend selector. Selecting a backend does not change the
/// observable contract of [`LLMClient`] (spec §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LLMProvider {
    HostedA,
    HostedB,
    Local,
}
