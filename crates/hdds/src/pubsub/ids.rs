// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unique identifiers for PubSub entities.
//!
//! Every Connection, ReaderGroup, DataSetReader and WriterGroup is
//! identified by a [`PubSubId`] minted by [`crate::pubsub::manager::PubSubManager`].
//! Ids are never reused while their entity (or a pending delayed-free of
//! it) is reachable from the manager graph (spec §3 invariant 5).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide unique identifier for a PubSub entity.
///
/// Deliberately opaque and `Copy`: children hold their parent's id
/// rather than a raw pointer, and resolve it under the service mutex
/// (spec §9, "Cyclic parent/child references").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PubSubId(u64);

impl PubSubId {
    /// Construct directly from a raw value. Only the id-minting
    /// authority ([`IdMinter`]) should call this in production code;
    /// exposed for tests that need deterministic ids.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value, for logging.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PubSubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id minter. `0` is reserved as the sentinel "no id" value,
/// so the first minted id is `1`.
#[derive(Debug)]
pub struct IdMinter {
    next: AtomicU64,
}

impl Default for IdMinter {
    fn default() -> Self {
        Self::new()
    }
}

impl IdMinter {
    /// Create a fresh minter.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Mint the next identifier. Never returns the same value twice for
    /// the lifetime of this minter (spec §4.1 "mint yields an
    /// identifier not currently used by any live entity").
    pub fn mint(&self) -> PubSubId {
        PubSubId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_minter_never_mints_the_sentinel() {
        let minter = IdMinter::default();
        assert_ne!(minter.mint().raw(), 0);
    }

    #[test]
    fn mint_never_repeats() {
        let minter = IdMinter::new();
        let a = minter.mint();
        let b = minter.mint();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn display_is_stable() {
        let id = PubSubId::from_raw(42);
        assert_eq!(format!("{id}"), "#42");
    }
}
