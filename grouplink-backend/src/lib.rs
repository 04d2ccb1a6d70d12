//! `GroupLink` backend library.
//!
//! An in-memory group chat backend for development and testing. It accepts
//! WebSocket connections at `/api/{user_id}/{group_id}/ws`, keeps one
//! message log per group, and fans new messages out to every member of the
//! group, including the sender.

pub mod config;
pub mod groups;
pub mod server;
