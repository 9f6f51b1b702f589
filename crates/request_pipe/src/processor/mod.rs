//! Processors
//!
//! Processors run after the middleware. The [`RequestProcessor`] always runs
//! last and is the only handler that talks to the transport.

pub mod request;

pub use request::RequestProcessor;
