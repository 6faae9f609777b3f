//! The ironloop agent loops.
//!
//! The agent follows a Think–Act–Observe cycle:
//!
//! 1. **Build context** — the memory manager assembles system messages,
//!    the active summary, and the buffered turns
//! 2. **Call the LLM** — through the provider adapter
//! 3. **If tool calls** — dispatch each through the [`ToolExecutor`],
//!    append the results, loop back to step 2
//! 4. **If text only** — the inner loop returns the answer
//!
//! A bounded outer loop ([`VerifierLoop`]) judges whether the answer
//! actually satisfies the task and re-enters the inner loop with
//! corrective feedback when it does not. The [`RuntimeController`] owns
//! the cancellation token and the session lifecycle around both loops,
//! and the [`SubAgentSpawner`] exposes bounded one-level-deep delegation
//! to the model as ordinary tools.

pub mod controller;
pub mod executor;
pub mod react;
pub mod subagent;
pub mod test_helpers;
pub mod verifier;

pub use controller::RuntimeController;
pub use executor::ToolExecutor;
pub use react::{ReactLoop, MAX_ITERATIONS_MARKER};
pub use subagent::{
    ExploreContextTool, ParallelExecuteTool, SubAgentConfig, SubAgentSpawner, SubAgentSpec,
};
pub use verifier::{LlmVerifier, Verdict, Verifier, VerifierLoop};
