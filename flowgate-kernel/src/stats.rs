/**
 * STATISTIQUES DE SERVICE - Compteurs d'activité depuis le démarrage
 *
 * RÔLE :
 * Compte ce que le service a vu passer : transferts nouveaux, doublons,
 * terminés, échoués ; nettoyages nouveaux et terminés.
 *
 * FONCTIONNEMENT :
 * - Compteurs atomiques, incrémentés par la façade, jamais remis à zéro
 * - snapshot() fige le tout avec le temps de fonctionnement pour
 *   l'exposition HTTP
 */

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug)]
pub struct TransferStatistics {
    started_at: Instant,
    started_at_utc: OffsetDateTime,
    new_transfers: AtomicU64,
    duplicate_transfers: AtomicU64,
    completed_transfers: AtomicU64,
    failed_transfers: AtomicU64,
    new_cleanups: AtomicU64,
    completed_cleanups: AtomicU64,
}

/// Vue figée des compteurs, sérialisée telle quelle par l'API
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub started_at: String, // format RFC3339 pour l'API
    pub uptime_seconds: u64,
    pub new_transfers: u64,
    pub duplicate_transfers: u64,
    pub completed_transfers: u64,
    pub failed_transfers: u64,
    pub new_cleanups: u64,
    pub completed_cleanups: u64,
}

impl Default for TransferStatistics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            started_at_utc: OffsetDateTime::now_utc(),
            new_transfers: AtomicU64::new(0),
            duplicate_transfers: AtomicU64::new(0),
            completed_transfers: AtomicU64::new(0),
            failed_transfers: AtomicU64::new(0),
            new_cleanups: AtomicU64::new(0),
            completed_cleanups: AtomicU64::new(0),
        }
    }
}

impl TransferStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfer_added(&self) {
        self.new_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_duplicate(&self) {
        self.duplicate_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_completed(&self) {
        self.completed_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_failed(&self) {
        self.failed_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cleanup_added(&self) {
        self.new_cleanups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cleanup_completed(&self) {
        self.completed_cleanups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            started_at: self
                .started_at_utc
                .format(&Rfc3339)
                .unwrap_or_default(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            new_transfers: self.new_transfers.load(Ordering::Relaxed),
            duplicate_transfers: self.duplicate_transfers.load(Ordering::Relaxed),
            completed_transfers: self.completed_transfers.load(Ordering::Relaxed),
            failed_transfers: self.failed_transfers.load(Ordering::Relaxed),
            new_cleanups: self.new_cleanups.load(Ordering::Relaxed),
            completed_cleanups: self.completed_cleanups.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = TransferStatistics::new();
        stats.transfer_added();
        stats.transfer_added();
        stats.transfer_duplicate();
        stats.transfer_completed();
        stats.transfer_failed();
        stats.cleanup_added();
        stats.cleanup_completed();

        let snap = stats.snapshot();
        assert_eq!(snap.new_transfers, 2);
        assert_eq!(snap.duplicate_transfers, 1);
        assert_eq!(snap.completed_transfers, 1);
        assert_eq!(snap.failed_transfers, 1);
        assert_eq!(snap.new_cleanups, 1);
        assert_eq!(snap.completed_cleanups, 1);
    }
}
