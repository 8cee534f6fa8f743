// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Thread-safe marker store with per-key expiry.
//!
//! Markers live in a [`DashMap`]; the entry API gives an atomic
//! check-and-insert per key, so two racing callers can never both create the
//! same marker. Each marker records the owner that created it, and only that
//! owner may extend or remove it.

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::store::DedupStore;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Expired markers are swept once every this many creations.
const PURGE_EVERY: usize = 1024;

#[derive(Debug)]
struct Marker {
    owner: String,
    expires_at: Instant,
}

impl Marker {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

pub struct MemoryDedupStore {
    markers: DashMap<String, Marker>,
    clock: Arc<dyn Clock>,
    created: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            markers: DashMap::new(),
            clock,
            created: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Whether a live marker exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.markers.get(key).is_some_and(|m| m.is_live(now))
    }

    /// Drops expired markers and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.markers.len();
        self.markers.retain(|_, marker| marker.is_live(now));
        before.saturating_sub(self.markers.len())
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("dedup store is offline".into()));
        }
        Ok(())
    }
}

impl Default for MemoryDedupStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupStore for MemoryDedupStore {
    fn create_if_absent(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.ensure_online()?;
        let now = self.clock.now();
        let marker = Marker {
            owner: owner.to_owned(),
            expires_at: now + ttl,
        };

        let created = match self.markers.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live(now) {
                    false
                } else {
                    // Expired marker counts as absent.
                    entry.insert(marker);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(marker);
                true
            }
        };

        // The entry guard is released above; sweeping takes every shard lock.
        if created && (self.created.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_EVERY == 0 {
            self.purge_expired();
        }
        Ok(created)
    }

    fn set_expiry(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.ensure_online()?;
        let now = self.clock.now();

        match self.markers.get_mut(key) {
            Some(mut marker) if marker.is_live(now) && marker.owner == owner => {
                marker.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        self.ensure_online()?;
        Ok(self
            .markers
            .remove_if(key, |_, marker| marker.owner == owner)
            .is_some())
    }
}
