/**
 * GRAND LIVRE DES ALLOCATIONS - Réservations partagées entre processus
 *
 * RÔLE :
 * Chaque instance du service inscrit ici ses réservations provisoires de
 * flux et de débit par paire d'hôtes. Toutes les instances d'un même site
 * partagent le même grand livre (répertoire de fichiers ou base SQLite),
 * ce qui leur permet de voir les réservations des autres.
 *
 * FONCTIONNEMENT :
 * - Un enregistrement = (id, hôte source, hôte destination, flux, débit)
 * - add refuse un id déjà présent ; upsert écrase ; remove supprime
 * - Les agrégats par paire d'hôtes additionnent TOUTES les réservations
 *   visibles, les nôtres comprises (l'auto-exclusion est faite par la
 *   politique, qui connaît sa propre réservation)
 * - close retire uniquement les enregistrements posés par cette instance
 *
 * UTILITÉ DANS FLOWGATE :
 * 🎯 Coordination inter-processus sans serveur central
 * 🎯 Un enregistrement illisible vaut 0 dans les agrégats (journalisé,
 *    jamais fatal)
 */

pub mod file;
pub mod sql;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("allocation {0} déjà présente dans le grand livre")]
    AlreadyExists(String),
    #[error("allocation {0} absente du grand livre")]
    NotFound(String),
    #[error("enregistrement illisible: {0}")]
    BadRecord(String),
    #[error("e/s du grand livre: {0}")]
    Io(#[from] std::io::Error),
    #[error("base du grand livre: {0}")]
    Database(#[from] sqlx::Error),
}

/// Réservation provisoire de flux et de débit pour un transfert
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAllocation {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub streams: i64,
    pub rate: f64,
}

impl ResourceAllocation {
    pub fn new(id: &str, source: &str, destination: &str, streams: i64, rate: f64) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            streams,
            rate,
        }
    }
}

/// Format texte plat d'un enregistrement, une ligne :
/// id=...,source=...,destination=...,streams=...,rate=...
impl fmt::Display for ResourceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={},source={},destination={},streams={},rate={}",
            self.id, self.source, self.destination, self.streams, self.rate
        )
    }
}

impl FromStr for ResourceAllocation {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = None;
        let mut source = None;
        let mut destination = None;
        let mut streams = None;
        let mut rate = None;
        for field in s.trim().split(',') {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| AllocationError::BadRecord(s.to_string()))?;
            match key {
                "id" => id = Some(value.to_string()),
                "source" => source = Some(value.to_string()),
                "destination" => destination = Some(value.to_string()),
                "streams" => {
                    streams = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| AllocationError::BadRecord(s.to_string()))?,
                    )
                }
                "rate" => {
                    rate = Some(
                        value
                            .parse::<f64>()
                            .map_err(|_| AllocationError::BadRecord(s.to_string()))?,
                    )
                }
                _ => return Err(AllocationError::BadRecord(s.to_string())),
            }
        }
        match (id, source, destination, streams, rate) {
            (Some(id), Some(source), Some(destination), Some(streams), Some(rate))
                if streams >= 0 && rate >= 0.0 =>
            {
                Ok(Self {
                    id,
                    source,
                    destination,
                    streams,
                    rate,
                })
            }
            _ => Err(AllocationError::BadRecord(s.to_string())),
        }
    }
}

/// Contrat du grand livre, indépendant du support (fichiers ou SQL)
#[async_trait]
pub trait AllocationLedger: Send + Sync {
    /// Enregistre une nouvelle réservation. Échoue si l'id existe déjà.
    async fn add(&self, allocation: &ResourceAllocation) -> Result<(), AllocationError>;

    /// Remplace la réservation portant cet id. Échoue si elle est absente.
    async fn update(&self, allocation: &ResourceAllocation) -> Result<(), AllocationError>;

    /// Écrase la réservation portant cet id, ou la crée si absente.
    async fn upsert(&self, allocation: &ResourceAllocation) -> Result<(), AllocationError>;

    /// Retire et rend la réservation portant cet id, si elle existait.
    async fn remove(&self, id: &str) -> Result<Option<ResourceAllocation>, AllocationError>;

    /// Relit une réservation par id.
    async fn get(&self, id: &str) -> Result<Option<ResourceAllocation>, AllocationError>;

    /// Somme des flux réservés entre ces deux hôtes, toutes instances.
    async fn total_streams(&self, source: &str, destination: &str)
        -> Result<i64, AllocationError>;

    /// Somme des débits réservés entre ces deux hôtes, toutes instances.
    async fn total_rate(&self, source: &str, destination: &str) -> Result<f64, AllocationError>;

    /// Nombre de réservations lisibles entre ces deux hôtes.
    async fn count(&self, source: &str, destination: &str) -> Result<usize, AllocationError>;

    /// Retire les réservations posées par CETTE instance, et elles seules.
    async fn close(&self) -> Result<(), AllocationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let a = ResourceAllocation::new("job-1", "server1.isi.edu", "client1.isi.edu", 6, 100.0);
        let text = a.to_string();
        assert_eq!(
            text,
            "id=job-1,source=server1.isi.edu,destination=client1.isi.edu,streams=6,rate=100"
        );
        let b: ResourceAllocation = text.parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_record_roundtrip_fractional_rate() {
        let a = ResourceAllocation::new("job-2", "a.isi.edu", "b.isi.edu", 1, 62.5);
        let b: ResourceAllocation = a.to_string().parse().unwrap();
        assert_eq!(b.rate, 62.5);
    }

    #[test]
    fn test_bad_record_is_rejected() {
        assert!("".parse::<ResourceAllocation>().is_err());
        assert!("id=x,source=a".parse::<ResourceAllocation>().is_err());
        assert!(
            "id=x,source=a,destination=b,streams=six,rate=1"
                .parse::<ResourceAllocation>()
                .is_err()
        );
        assert!(
            "id=x,source=a,destination=b,streams=1,rate=1,extra=2"
                .parse::<ResourceAllocation>()
                .is_err()
        );
        // Une réservation négative n'a aucun sens pour l'agrégation
        assert!(
            "id=x,source=a,destination=b,streams=-100,rate=1"
                .parse::<ResourceAllocation>()
                .is_err()
        );
        assert!(
            "id=x,source=a,destination=b,streams=1,rate=-1.5"
                .parse::<ResourceAllocation>()
                .is_err()
        );
    }
}
