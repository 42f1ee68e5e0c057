/**
 * FAÇADE DE LA POLITIQUE - API publique du service
 *
 * RÔLE :
 * Les clients (HTTP ou embarqués) ne parlent qu'à la façade : elle valide
 * les demandes, délègue à la session de décision et tient les compteurs
 * d'activité.
 *
 * FONCTIONNEMENT :
 * - add refuse une entité portant déjà un id ; update en exige un
 * - Propriétés numériques (data_volume, adjusted_*) vérifiées, et
 *   refusées si négatives, avant d'entrer dans la session
 * - Un doublon de transfert est rendu tel quel, sans avis, et compté
 * - Un nettoyage retenu rend None : le client réessaiera
 */

use crate::entity::{
    Cleanup, Entity, Resource, Transfer, ADJUSTED_RATE_PROPERTY, ADJUSTED_STREAMS_PROPERTY,
    DATA_VOLUME_PROPERTY,
};
use crate::session::{
    CleanupOutcome, DecisionSession, SessionError, TransferOutcome, TransferUpdate,
};
use crate::stats::{StatisticsSnapshot, TransferStatistics};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("demande invalide: {0}")]
    Validation(String),
    #[error("entité {0} inconnue")]
    NotFound(String),
    #[error("variable globale {0} inconnue")]
    GlobalNotFound(String),
    #[error(transparent)]
    Session(SessionError),
}

impl From<SessionError> for PolicyError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::UnknownFact(id) => PolicyError::NotFound(id),
            SessionError::UnknownGlobal(name) => PolicyError::GlobalNotFound(name),
            other => PolicyError::Session(other),
        }
    }
}

pub struct PolicyFacade {
    session: DecisionSession,
    stats: TransferStatistics,
}

impl PolicyFacade {
    pub fn new(session: DecisionSession) -> Self {
        Self {
            session,
            stats: TransferStatistics::new(),
        }
    }

    fn check_numeric_properties(entity: &impl Entity) -> Result<(), PolicyError> {
        for key in [DATA_VOLUME_PROPERTY, ADJUSTED_STREAMS_PROPERTY] {
            if let Some(value) = entity.property(key) {
                let parsed = value.parse::<i64>().map_err(|_| {
                    PolicyError::Validation(format!("{key} non numérique: {value}"))
                })?;
                if parsed < 0 {
                    return Err(PolicyError::Validation(format!(
                        "{key} négatif: {value}"
                    )));
                }
            }
        }
        if let Some(value) = entity.property(ADJUSTED_RATE_PROPERTY) {
            let parsed = value.parse::<f64>().map_err(|_| {
                PolicyError::Validation(format!(
                    "{ADJUSTED_RATE_PROPERTY} non numérique: {value}"
                ))
            })?;
            if parsed < 0.0 {
                return Err(PolicyError::Validation(format!(
                    "{ADJUSTED_RATE_PROPERTY} négatif: {value}"
                )));
            }
        }
        Ok(())
    }

    /// Soumet un transfert et rend la version avisée.
    /// Un doublon revient tel quel, sans avis, mais est compté.
    pub async fn add_transfer(&self, transfer: Transfer) -> Result<Transfer, PolicyError> {
        if transfer.has_id() {
            return Err(PolicyError::Validation(
                "un transfert soumis ne porte pas encore d'id".to_string(),
            ));
        }
        Self::check_numeric_properties(&transfer)?;
        match self.session.insert_transfer(transfer).await? {
            TransferOutcome::Admitted(t) => {
                self.stats.transfer_added();
                Ok(t)
            }
            TransferOutcome::Duplicate(t) => {
                self.stats.transfer_duplicate();
                Ok(t)
            }
        }
    }

    pub async fn update_transfer(&self, transfer: Transfer) -> Result<Transfer, PolicyError> {
        let id = transfer
            .id()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                PolicyError::Validation("une mise à jour exige un id".to_string())
            })?;
        Self::check_numeric_properties(&transfer)?;
        match self.session.update_transfer(&id, transfer).await? {
            TransferUpdate::Advised(t) => Ok(t),
            TransferUpdate::Completed(t) => {
                self.stats.transfer_completed();
                Ok(t)
            }
            TransferUpdate::Failed(t) => {
                self.stats.transfer_failed();
                Ok(t)
            }
        }
    }

    pub async fn get_transfer(&self, id: &str) -> Result<Transfer, PolicyError> {
        self.session
            .get_transfer(id)
            .await
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))
    }

    pub async fn remove_transfer(&self, id: &str) -> Result<Transfer, PolicyError> {
        Ok(self.session.remove_transfer(id).await?)
    }

    pub async fn list_transfers(&self) -> Vec<Transfer> {
        self.session.transfers().await
    }

    /// Dépose un nettoyage. None tant que la ressource est encore référencée.
    pub async fn add_cleanup(&self, cleanup: Cleanup) -> Result<Option<Cleanup>, PolicyError> {
        if cleanup.has_id() {
            return Err(PolicyError::Validation(
                "un nettoyage soumis ne porte pas encore d'id".to_string(),
            ));
        }
        self.stats.cleanup_added();
        match self.session.insert_cleanup(cleanup).await? {
            CleanupOutcome::Actionable(c) => Ok(Some(c)),
            CleanupOutcome::Withheld { remaining } => {
                eprintln!("[facade] nettoyage retenu, {remaining} job(s) restant(s)");
                Ok(None)
            }
        }
    }

    pub async fn update_cleanup(&self, cleanup: Cleanup) -> Result<Cleanup, PolicyError> {
        let id = cleanup
            .id()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                PolicyError::Validation("une mise à jour exige un id".to_string())
            })?;
        let (cleanup, completed) = self.session.update_cleanup(&id, cleanup).await?;
        if completed {
            self.stats.cleanup_completed();
        }
        Ok(cleanup)
    }

    pub async fn get_cleanup(&self, id: &str) -> Result<Cleanup, PolicyError> {
        self.session
            .get_cleanup(id)
            .await
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))
    }

    pub async fn remove_cleanup(&self, id: &str) -> Result<Cleanup, PolicyError> {
        Ok(self.session.remove_cleanup(id).await?)
    }

    pub async fn list_cleanups(&self) -> Vec<Cleanup> {
        self.session.cleanups().await
    }

    pub async fn list_resources(&self) -> Vec<Resource> {
        self.session.resources().await
    }

    pub async fn get_variable(&self, name: &str) -> Result<f64, PolicyError> {
        Ok(self.session.get_global(name).await?)
    }

    pub async fn set_variable(&self, name: &str, value: f64) -> Result<(), PolicyError> {
        Ok(self.session.set_global(name, value).await?)
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    pub async fn shutdown(&self) -> Result<(), PolicyError> {
        Ok(self.session.shutdown().await?)
    }
}
