//! Record API — the server that owns session records, reservations, and
//! processing results, and the HTTP client the wizard uses to reach it.

pub mod client;
pub mod routes;

pub use client::HttpRecordClient;
pub use routes::{RecordRouteState, record_routes};
