//! Worker service for the Kemet voice assistant.

pub mod config;
pub mod persona;
