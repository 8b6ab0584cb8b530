//! Core library for Fantea CMS.
//!
//! Contains the content store, change-detection checksum, the client-side
//! sync engine and its broadcast hub, the declarative DOM binding table and
//! patcher, the admin editor's form collectors, the session/auth module, and
//! image upload handling. This crate depends on `fantea-storage` for the
//! storage backend trait and knows nothing about HTTP.

pub mod auth;
pub mod binding;
pub mod broadcast;
pub mod cache;
pub mod checksum;
pub mod document;
pub mod dom;
pub mod editor;
pub mod error;
pub mod patcher;
pub mod source;
pub mod store;
pub mod sync;
pub mod upload;
