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

//! Unit-of-work coordination.
//!
//! [`Coordinator::run`] opens a scope, hands it to the caller's work, and
//! either commits or discards it. Each invocation ends fully applied or fully
//! discarded; crash recovery between the two is the storage domain's job.

use crate::error::{LedgerError, Phase};
use crate::store::AtomicDomain;
use std::sync::Arc;
use tracing::{debug, error};

pub struct Coordinator<D: AtomicDomain> {
    domain: Arc<D>,
}

impl<D: AtomicDomain> Coordinator<D> {
    pub fn new(domain: Arc<D>) -> Self {
        Self { domain }
    }

    /// Runs `work` inside one atomic scope.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::StorageUnavailable`] with [`Phase::Begin`] if no scope
    ///   could be opened.
    /// - Whatever `work` returned, after discarding the scope.
    /// - [`LedgerError::StorageUnavailable`] with [`Phase::Commit`] if the
    ///   commit failed; the outcome is then ambiguous.
    pub fn run<T, F>(&self, work: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut D::Scope) -> Result<T, LedgerError>,
    {
        let mut scope = self
            .domain
            .begin()
            .map_err(|e| LedgerError::from_store(e, Phase::Begin))?;

        let value = match work(&mut scope) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "Unit of work failed, discarding");
                self.domain.discard(scope);
                return Err(err);
            }
        };

        match self.domain.commit(scope) {
            Ok(()) => Ok(value),
            Err(err) => {
                error!(error = %err, "Commit failed");
                Err(LedgerError::from_store(err, Phase::Commit))
            }
        }
    }
}
