// grip-test-utils: a mock GRIP backend for integration testing.
//
// Binds an HTTP server on a random port, records every request the gateway
// makes (event batches and proxied traffic alike), and answers from a
// caller-supplied responder.

mod mock_backend;

pub use mock_backend::{BackendReply, MockBackend, RecordedRequest};
