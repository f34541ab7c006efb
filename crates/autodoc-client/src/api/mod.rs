//! Thin typed wrappers over the backend endpoints.
//!
//! Each wrapper borrows an [`ApiClient`](crate::http::ApiClient) and goes
//! through [`request`](crate::http::ApiClient::request), so bearer auth and
//! the refresh-and-retry path apply uniformly.

pub mod auth;
pub mod projects;

pub use self::{
    auth::{AuthApi, AuthSession, User},
    projects::{NewProject, Project, ProjectPatch, ProjectsApi},
};
