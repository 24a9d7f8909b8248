//! Development API server for the medsync client.
//!
//! The CLI binary lives in `main.rs`; this library exposes the in-memory
//! REST server used by `medsync-server` and by the end-to-end tests.

pub mod server;
