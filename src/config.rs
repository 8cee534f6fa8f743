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

//! Ledger tuning knobs.

use serde::Deserialize;
use std::time::Duration;

/// Settings for the deduplication guard.
///
/// Deserializes from any serde format; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Lifetime of a freshly admitted marker, in milliseconds.
    pub in_flight_ttl_ms: u64,
    /// Lifetime of a marker after its movement committed, in seconds.
    pub retention_ttl_secs: u64,
    /// Prefix of every marker key.
    pub key_prefix: String,
}

impl LedgerConfig {
    pub const DEFAULT_IN_FLIGHT_TTL_MS: u64 = 5_000;
    pub const DEFAULT_RETENTION_TTL_SECS: u64 = 24 * 60 * 60;
    pub const DEFAULT_KEY_PREFIX: &'static str = "txn_lock";

    pub fn in_flight_ttl(&self) -> Duration {
        Duration::from_millis(self.in_flight_ttl_ms)
    }

    pub fn retention_ttl(&self) -> Duration {
        Duration::from_secs(self.retention_ttl_secs)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            in_flight_ttl_ms: Self::DEFAULT_IN_FLIGHT_TTL_MS,
            retention_ttl_secs: Self::DEFAULT_RETENTION_TTL_SECS,
            key_prefix: Self::DEFAULT_KEY_PREFIX.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.in_flight_ttl(), Duration::from_secs(5));
        assert_eq!(config.retention_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.key_prefix, "txn_lock");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: LedgerConfig = serde_json::from_str(r#"{"in_flight_ttl_ms": 250}"#).unwrap();
        assert_eq!(config.in_flight_ttl(), Duration::from_millis(250));
        assert_eq!(config.key_prefix, "txn_lock");
    }
}
