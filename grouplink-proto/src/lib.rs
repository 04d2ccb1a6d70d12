//! Shared wire-protocol definitions for the `GroupLink` chat backend.

pub mod action;
pub mod codec;
pub mod event;
pub mod message;
