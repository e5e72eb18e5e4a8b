//! Session, credential and route-gating core for the LearnTAV site.
//!
//! All state lives as JSON strings in two [`storage::Storage`] areas: a
//! persistent *local* area and a per-process *tab* area. [`AuthService`]
//! is the entry point; the components it wraps are public for callers that
//! need only one of them.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod gatekeeper;
pub mod security;
pub mod storage;

pub use auth::{AuthService, LoginOutcome, LoginRequest};
pub use config::Config;
pub use error::{AuthError, Result};
