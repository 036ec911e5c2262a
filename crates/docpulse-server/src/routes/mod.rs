//! HTTP route handlers.

pub mod auth;
pub mod health;
pub mod tunnel;

pub use auth::{
    CallbackQuery, SessionResponse, StatusResponse, auth_status, begin, callback, logout,
    user_info,
};
pub use health::{HealthResponse, health, health_routes};
pub use tunnel::{
    StartQuery, redirect_uri as tunnel_redirect_uri, start as tunnel_start,
    status as tunnel_status, stop as tunnel_stop,
};
