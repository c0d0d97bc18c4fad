//! Hierarchical write quotas.
//!
//! A [`QuotaTracker`] holds byte caps keyed by lexically cleaned path
//! prefixes. Each write is charged to the longest registered prefix that
//! contains it. Accounting is advisory: it counts bytes callers declare
//! before writing, and declared bytes are never refunded if the write
//! itself later fails.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::QuotaError;
use crate::path::{clean, depth, is_within};

/// Fractions of a quota at which the tracker warns and refuses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaThresholds {
    /// Crossing this fraction upward logs one warning.
    pub warn: f64,
    /// Reaching this fraction refuses the write.
    pub error: f64,
}

impl Default for QuotaThresholds {
    fn default() -> Self {
        Self {
            warn: 0.8,
            error: 0.95,
        }
    }
}

impl QuotaThresholds {
    /// Check `0 < warn <= error <= 1`.
    pub fn validate(&self) -> Result<(), QuotaError> {
        let in_range = |v: f64| v > 0.0 && v <= 1.0;
        if in_range(self.warn) && in_range(self.error) && self.warn <= self.error {
            Ok(())
        } else {
            Err(QuotaError::InvalidThresholds {
                warn: self.warn,
                error: self.error,
            })
        }
    }
}

/// Usage snapshot for one prefix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaUsage {
    /// Bytes charged since the last reset.
    pub used_bytes: u64,
    /// The configured cap.
    pub quota_bytes: u64,
    /// `used_bytes / quota_bytes`; zero when the cap is zero.
    pub fraction_used: f64,
}

#[derive(Debug, Clone, Copy)]
struct QuotaEntry {
    quota_bytes: u64,
    used_bytes: u64,
}

/// Longest-prefix byte ledger shared by concurrent writers.
///
/// Every operation takes the same mutex, so two writes against the same
/// prefix linearise: the second one observes the first one's charge.
///
/// # Examples
///
/// ```
/// use stepkit_sandbox::QuotaTracker;
///
/// let tracker = QuotaTracker::default();
/// tracker.set_quota("/out", 1000);
/// assert!(tracker.track_write("/out/a.bin", 600).is_ok());
/// assert!(tracker.track_write("/out/b.bin", 600).is_err());
/// assert_eq!(tracker.usage("/out").unwrap().used_bytes, 600);
/// ```
#[derive(Debug, Default)]
pub struct QuotaTracker {
    thresholds: QuotaThresholds,
    entries: Mutex<BTreeMap<PathBuf, QuotaEntry>>,
}

impl QuotaTracker {
    /// Create a tracker with validated thresholds.
    pub fn new(thresholds: QuotaThresholds) -> Result<Self, QuotaError> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    /// The thresholds this tracker enforces.
    pub fn thresholds(&self) -> QuotaThresholds {
        self.thresholds
    }

    /// Register or replace the cap for a prefix.
    ///
    /// Replacing a cap keeps the bytes already charged to the prefix.
    pub fn set_quota(&self, prefix: impl AsRef<Path>, quota_bytes: u64) {
        let prefix = clean(prefix.as_ref());
        let mut entries = self.entries.lock();
        entries
            .entry(prefix)
            .and_modify(|e| e.quota_bytes = quota_bytes)
            .or_insert(QuotaEntry {
                quota_bytes,
                used_bytes: 0,
            });
    }

    /// Charge `bytes` to the longest registered prefix containing `path`.
    ///
    /// Writes outside every prefix are free. A refused write leaves the
    /// ledger untouched.
    pub fn track_write(&self, path: impl AsRef<Path>, bytes: u64) -> Result<(), QuotaError> {
        let path = clean(path.as_ref());
        let mut entries = self.entries.lock();

        let Some((prefix, entry)) = entries
            .iter_mut()
            .filter(|(prefix, _)| is_within(&path, prefix))
            .max_by_key(|(prefix, _)| depth(prefix))
        else {
            return Ok(());
        };

        let quota = entry.quota_bytes as f64;
        let limit = self.thresholds.error * quota;
        let before = entry.used_bytes;
        let after = before.saturating_add(bytes);

        if after as f64 >= limit {
            return Err(QuotaError::Exceeded {
                prefix: prefix.clone(),
                used_bytes: before,
                requested_bytes: bytes,
                limit_bytes: limit.floor() as u64,
            });
        }

        let warn_at = self.thresholds.warn * quota;
        if (before as f64) < warn_at && after as f64 >= warn_at {
            warn!(
                prefix = %prefix.display(),
                used_bytes = after,
                quota_bytes = entry.quota_bytes,
                threshold = self.thresholds.warn,
                "write quota warning threshold crossed"
            );
        }

        entry.used_bytes = after;
        Ok(())
    }

    /// Usage for an exact registered prefix.
    pub fn usage(&self, prefix: impl AsRef<Path>) -> Option<QuotaUsage> {
        let prefix = clean(prefix.as_ref());
        let entries = self.entries.lock();
        entries.get(&prefix).map(|e| QuotaUsage {
            used_bytes: e.used_bytes,
            quota_bytes: e.quota_bytes,
            fraction_used: if e.quota_bytes == 0 {
                0.0
            } else {
                e.used_bytes as f64 / e.quota_bytes as f64
            },
        })
    }

    /// Registered prefixes, shortest first.
    pub fn prefixes(&self) -> Vec<PathBuf> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Zero every prefix's usage; caps are kept.
    pub fn reset(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.values_mut() {
            entry.used_bytes = 0;
        }
    }
}
