//! # Raceday Gateway
//!
//! Thin management API over the engine, outside the hot path: task
//! definition CRUD (custom tasks only — built-ins are code-owned), run
//! status and execution history, notification history, and scheduler
//! lifecycle. Consumes the same store surface the admin UI does.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};
