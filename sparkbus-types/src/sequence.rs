//! Sparkplug sequence accounting.
//!
//! Two counters govern a session: `seq` orders every BIRTH/DATA/DDEATH
//! payload inside a session (0..=255 wrapping, reset to 0 by NBIRTH), and
//! `bdSeq` ties an NBIRTH to the NDEATH registered as the MQTT will for the
//! same connection attempt.

use std::sync::atomic::{AtomicU8, Ordering};

/// The per-session payload sequence number.
#[derive(Debug, Default)]
pub struct SeqCounter(AtomicU8);

impl SeqCounter {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Take the next sequence number. Post-increments, wrapping 255 -> 0.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) as u64
    }

    /// Reset so the next payload carries seq 0. Called when assembling an
    /// NBIRTH.
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// The birth/death sequence number.
///
/// Bumped once per connection attempt and stable for the lifetime of the
/// session, so the NBIRTH and the NDEATH will configured before connecting
/// always carry the same value.
#[derive(Debug, Default)]
pub struct BdSeqCounter(AtomicU8);

impl BdSeqCounter {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn current(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }

    /// Advance for a new connection attempt, wrapping 255 -> 0.
    pub fn bump(&self) -> u8 {
        self.0.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }
}
