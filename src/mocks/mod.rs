//! Test doubles for provider clients.

mod transport;

pub use transport::{MockResponse, MockTransport, RecordedRequest};
