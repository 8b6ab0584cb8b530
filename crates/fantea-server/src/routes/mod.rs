//! HTTP route modules for the Fantea content service.
//!
//! Each module exposes a `router()` returning an Axum [`Router`] that is
//! nested under its prefix in [`crate::build_router`].
//!
//! [`Router`]: axum::Router

pub mod auth;
pub mod cms;
pub mod health;
pub mod upload;
