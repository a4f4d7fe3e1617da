pub mod auth;
pub mod download;
pub mod gate;
pub mod routes;
pub mod track;

pub use routes::*;
