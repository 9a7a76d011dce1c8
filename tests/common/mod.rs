//! Common test infrastructure for `extscript` integration tests.
//!
//! - [`harness::TestHarness`] wires an [`extscript::ExtensionService`] over an
//!   in-memory store, a recording script logger, a canned HTTP client and a
//!   manual clock.
//! - [`scripts`] builds well-formed script sources.

pub mod harness;
pub mod scripts;

#[allow(unused_imports)]
pub use harness::{RecordingLogger, StubHttpClient, TestHarness};
