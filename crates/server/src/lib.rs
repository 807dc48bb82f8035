//! HTTP surface of the intake pipeline.
//!
//! - `POST /import/csv` stages an upload, creates its job and enqueues it
//! - `GET /jobs/{id}` and `GET /repos` read the stores
//! - `GET /ws` pushes job outcomes to connected clients
//! - `GET /health` reports queue connectivity

pub mod api;
pub mod live;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
