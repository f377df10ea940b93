//! Control-Plane API (C11). Mirrors the `read` / `write` / `execute` module
//! split: `read` holds side-effect-free queries, `write` holds
//! registry-mutating CRUD, `execute` holds actions with external effects
//! (deployment lifecycle, restart).

pub mod execute;
pub mod read;
pub mod write;

use axum::Router;

pub fn router() -> Router {
  Router::new()
    .nest("/read", read::router())
    .nest("/write", write::router())
    .nest("/execute", execute::router())
}
