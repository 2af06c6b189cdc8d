//! Core Zori client library (session, API client, auth, projects, organization, config).

pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod organization;
pub mod projects;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod validation;

pub use client::{ApiClient, RequestOptions};
pub use error::{ApiError, ApiErrorKind, ErrorContext, SessionError};
pub use session::SessionStore;
