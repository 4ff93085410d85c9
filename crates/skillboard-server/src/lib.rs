//! REST API server: profile routes, DTOs, and per-source orchestrator state.

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;
