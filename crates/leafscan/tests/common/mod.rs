//! Shared test utilities for leafscan integration tests.
//!
//! - `TestHarness` owns a temporary database and configuration
//! - `StubLoader` serves deterministic networks driven by the image bytes

pub mod harness;
pub mod stubs;

pub use harness::TestHarness;
pub use stubs::{stub_image, StubLoader};
