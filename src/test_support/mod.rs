//! Internal helpers re-exported for integration tests.
//!
//! The fakes stand in for the store's collaborators: archive extraction,
//! HTTP transfers, release lookups, and process execution. Each records how
//! it was called so tests can assert on the interaction as well as the
//! outcome.

mod fakes;
mod logging;

pub use fakes::{
    FakeExtractor, FakeHttpClient, FakeLookup, FakeReleaseSource, RecordedRequest,
    RecordingRunner, asset, release,
};
pub use logging::{capture_debug_logs, capture_logs};
