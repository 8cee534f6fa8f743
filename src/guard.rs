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

//! Request deduplication.
//!
//! The guard gives each `(caller, idempotency token)` pair a single winner
//! among concurrent or retried submissions. Admission is one atomic
//! create-if-absent of a marker with a short lifetime; a second submission
//! while the marker lives is rejected with
//! [`LedgerError::DuplicateOrInFlight`].
//!
//! Once the movement finishes, [`DeduplicationGuard::settle`] adjusts the
//! marker to the outcome:
//!
//! | Outcome                        | Marker                               |
//! |--------------------------------|--------------------------------------|
//! | applied                        | kept for the retention window        |
//! | failed, nothing applied        | removed, the token may be retried    |
//! | failed, ambiguous              | left to expire on its own            |

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Outcome, Phase};
use crate::store::DedupStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Proof that a submission won its deduplication slot.
#[must_use = "an admission should be settled once the movement finishes"]
#[derive(Debug, PartialEq, Eq)]
pub struct Admission {
    key: String,
    /// Nonce stored as the marker value; settling acts only on a marker
    /// still holding it.
    owner: String,
}

impl Admission {
    pub fn key(&self) -> &str {
        &self.key
    }
}

pub struct DeduplicationGuard<S: DedupStore> {
    store: Arc<S>,
    key_prefix: String,
    in_flight_ttl: Duration,
    retention_ttl: Duration,
}

impl<S: DedupStore> DeduplicationGuard<S> {
    pub fn new(store: Arc<S>, config: &LedgerConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            in_flight_ttl: config.in_flight_ttl(),
            retention_ttl: config.retention_ttl(),
        }
    }

    /// Marker key for a `(caller, token)` pair.
    pub fn key(&self, caller: &str, token: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, caller, token)
    }

    /// Claims the deduplication slot for this submission.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::MissingCaller`] - blank caller identity.
    /// - [`LedgerError::MissingIdempotencyToken`] - absent or blank token.
    /// - [`LedgerError::DuplicateOrInFlight`] - a live marker already exists.
    /// - [`LedgerError::StorageUnavailable`] - the marker store could not be
    ///   reached; the request is refused rather than admitted.
    pub fn admit(&self, caller: &str, token: Option<&str>) -> Result<Admission, LedgerError> {
        let caller = caller.trim();
        if caller.is_empty() {
            return Err(LedgerError::MissingCaller);
        }
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(LedgerError::MissingIdempotencyToken)?;

        let key = self.key(caller, token);
        let owner = Uuid::new_v4().to_string();
        let created = self
            .store
            .create_if_absent(&key, &owner, self.in_flight_ttl)
            .map_err(|e| {
                warn!(key = %key, error = %e, "Deduplication store unreachable, refusing request");
                LedgerError::from_store(e, Phase::Guard)
            })?;

        if !created {
            info!(key = %key, "Duplicate submission rejected");
            return Err(LedgerError::DuplicateOrInFlight);
        }

        debug!(key = %key, ttl_ms = self.in_flight_ttl.as_millis() as u64, "Submission admitted");
        Ok(Admission { key, owner })
    }

    /// Adjusts the marker of `admission` to the result of its movement.
    ///
    /// Marker store failures here are logged and otherwise ignored: the
    /// movement has already finished and the marker still expires on its own.
    ///
    /// A marker that expired and was claimed again by a later admission is
    /// left alone in every case.
    pub fn settle<T>(&self, admission: Admission, result: &Result<T, LedgerError>) {
        let Admission { key, owner } = admission;
        let settled = match result {
            Ok(_) => self
                .store
                .set_expiry(&key, &owner, self.retention_ttl)
                .map(|extended| {
                    if !extended {
                        warn!(key = %key, "Marker expired before the movement finished");
                    }
                }),
            Err(err) if err.outcome() == Outcome::NothingApplied => {
                self.store.remove(&key, &owner).map(|removed| {
                    if !removed {
                        debug!(key = %key, "Marker already held by a later admission");
                    }
                })
            }
            Err(_) => Ok(()),
        };

        if let Err(e) = settled {
            warn!(key = %key, error = %e, "Failed to settle deduplication marker");
        }
    }
}
