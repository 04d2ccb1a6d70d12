//! `GroupLink` realtime group-messaging session client library.

pub mod auth;
pub mod config;
pub mod connection;
pub mod session;
pub mod store;
