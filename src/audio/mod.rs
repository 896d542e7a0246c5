//! Audio output module
//!
//! This module contains all playback-related functionality including:
//! - Device session and hardware negotiation ([`device`])
//! - ALSA backend ([`alsa`], feature `alsa`)
//! - Simulated driver for tests and dry runs ([`sim`])
//! - Square-wave period buffer ([`signal`])
//! - Round state machine and playback loop ([`driver`])

#[cfg(feature = "alsa")]
pub mod alsa;
pub mod device;
pub mod driver;
pub mod signal;
pub mod sim;
