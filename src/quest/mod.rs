//! Quest Marketplace Module
//!
//! The quest record model, the lifecycle engine (the state machine at the
//! heart of the marketplace), and the REST handlers that front it.

pub mod api;
pub mod engine;
pub mod model;

pub use engine::QuestEngine;
