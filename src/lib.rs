//! Authorization core of the restaurant storefront and back office.
//!
//! The client's identity is decoded from the backend's token, kept in the
//! client's session cookie, and checked by pure permission rules before any
//! protected route runs.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
