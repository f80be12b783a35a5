//! Message layer: JSON requests in, status envelopes out.

pub mod dispatcher;
pub mod envelope;
pub mod requests;

pub use dispatcher::RequestDispatcher;
pub use envelope::{Body, Envelope, Head, Status};
