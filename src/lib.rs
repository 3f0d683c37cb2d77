//! Lumina - chat assistant core for the Bhavani Digitals studio site.
//!
//! Streams answers from a hosted model, lets the model search for venues
//! mid-turn, and reconciles the streamed events into a transcript on the
//! client side.
//!
//! This library exposes the core functionality for both the CLI binary and
//! integration testing.

pub mod access;
pub mod client;
pub mod config;
pub mod engine;
pub mod events;
pub mod message;
pub mod notify;
pub mod places;
pub mod prompt;
pub mod providers;
pub mod proxy;
pub mod relay;
pub mod renderer;
pub mod store;
pub mod tools;
