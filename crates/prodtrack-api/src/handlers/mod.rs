//! API handlers

pub mod auth;
pub mod health;
pub mod permissions;
pub mod roles;
pub mod sessions;
pub mod users;
