//! Retry-driven code generation and execution engine.
//!
//! One natural-language instruction becomes a bounded loop of attempts: a
//! generation call produces a candidate script, a sandboxed execution runs
//! it, and the classified outcome decides whether the loop feeds the failure
//! back into another generation call or stops. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: pure, deterministic logic (task state, classification,
//!   retry decisions, payload cleaning). No I/O, fully testable in isolation.
//! - **[`io`]**: side-effecting adapters (model service, sandbox backends,
//!   configuration). Isolated to enable mocking in tests.
//!
//! [`engine`] ties core logic to the adapters; [`worker`] runs the engine on
//! a dedicated thread behind an awaitable [`worker::TaskHandle`].

pub mod cancel;
pub mod core;
pub mod engine;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;
