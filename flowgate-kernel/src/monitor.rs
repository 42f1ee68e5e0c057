/**
 * MONITEUR PASSIF - Observations réseau par paire d'hôtes
 *
 * RÔLE :
 * Fournit à la politique ce qu'un moniteur externe a réellement observé
 * entre deux hôtes : nombre de flux et débit atteints. La politique en
 * fait max(défaut configuré, observation), borné par le plafond.
 *
 * FONCTIONNEMENT :
 * - Un trait, pour brancher de vraies sondes plus tard
 * - TableMonitor : observations figées chargées de fichiers d'expressions,
 *   même format que la table des plafonds
 * - NullMonitor : aucun moniteur déployé, aucune observation
 */

use crate::caps::CapTable;

pub trait PassiveMonitor: Send + Sync {
    /// Flux parallèles observés entre ces hôtes, si le moniteur en a vu
    fn observed_streams(&self, source: &str, destination: &str) -> Option<i64>;

    /// Débit observé entre ces hôtes, si le moniteur en a vu
    fn observed_rate(&self, source: &str, destination: &str) -> Option<f64>;
}

/// Site sans moniteur : la politique s'en tient aux défauts configurés
#[derive(Debug, Default)]
pub struct NullMonitor;

impl PassiveMonitor for NullMonitor {
    fn observed_streams(&self, _source: &str, _destination: &str) -> Option<i64> {
        None
    }

    fn observed_rate(&self, _source: &str, _destination: &str) -> Option<f64> {
        None
    }
}

/// Observations chargées de fichiers d'expressions par paire d'hôtes
pub struct TableMonitor {
    streams: CapTable,
    rate: CapTable,
}

impl TableMonitor {
    pub fn new(streams: CapTable, rate: CapTable) -> Self {
        Self { streams, rate }
    }
}

impl PassiveMonitor for TableMonitor {
    fn observed_streams(&self, source: &str, destination: &str) -> Option<i64> {
        self.streams.lookup(source, destination).map(|v| v as i64)
    }

    fn observed_rate(&self, source: &str, destination: &str) -> Option<f64> {
        self.rate.lookup(source, destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_monitor_sees_nothing() {
        let monitor = NullMonitor;
        assert_eq!(monitor.observed_streams("a", "b"), None);
        assert_eq!(monitor.observed_rate("a", "b"), None);
    }

    #[test]
    fn test_table_monitor_reads_expression_tables() {
        let streams = CapTable::parse("server1.isi.edu client1.isi.edu 8\n").unwrap();
        let rate = CapTable::parse(".* .* 120\n").unwrap();
        let monitor = TableMonitor::new(streams, rate);
        assert_eq!(
            monitor.observed_streams("server1.isi.edu", "client1.isi.edu"),
            Some(8)
        );
        assert_eq!(monitor.observed_streams("x", "y"), None);
        assert_eq!(monitor.observed_rate("x", "y"), Some(120.0));
    }
}
