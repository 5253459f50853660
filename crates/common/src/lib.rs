//! Common types shared across the media orchestration crates.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes (consultations, participants, servers)
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
