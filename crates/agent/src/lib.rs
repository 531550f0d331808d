//! The conversational engine of mnemo.
//!
//! A turn flows through three stages:
//!
//! 1. **Assemble** a token-budgeted context from all six memory layers
//!    ([`context::ContextAssembler`])
//! 2. **Reason and act** in a ReAct loop: stream from the provider, run the
//!    requested tools, feed results back, repeat ([`react::ReactLoop`])
//! 3. **Remember** the exchange in the stream buffer, working memory and the
//!    episodic record ([`orchestrator::Orchestrator`])
//!
//! Sessions follow one user across channels; every state change goes through
//! the [`mnemo_core::session::SessionStore`] so a session never runs two turns
//! at once.

pub mod context;
pub mod orchestrator;
pub mod react;
pub mod session_store;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use context::{AssembledContext, AssemblyRequest, ContextAssembler, TokenCounter};
pub use orchestrator::{Orchestrator, ResolvedSession, SessionSummary};
pub use react::{CancelToken, ReactLoop, TurnInput, TurnOutcome, TurnStream};
pub use session_store::InMemorySessionStore;
pub use stream_event::{ReActEvent, StopReason};
