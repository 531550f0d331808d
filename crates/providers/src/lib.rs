//! LLM provider plumbing for mnemo.
//!
//! Providers implement `mnemo_core::LlmProvider`. The router wraps the
//! configured providers in breaker-guarded links of one fallback chain, which
//! is itself an `LlmProvider`.

pub mod circuit_breaker;
pub mod fallback;
pub mod openai_compat;
pub mod router;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use fallback::{ChainEntry, EntryStatus, FallbackChain};
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_chain, build_provider};
