//! Development REST API for the MedSync client.
//!
//! Serves every collection under `/api/{collection}` from memory using the
//! same envelope as the production API, so the client and its tests can
//! run end to end without the real backend.

pub mod collections;
pub mod routes;

pub use collections::{CollectionStore, ListParams};
pub use routes::{router, AppState};
