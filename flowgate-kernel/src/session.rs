/**
 * SESSION DE DÉCISION - Orchestration verrouillée des faits et des règles
 *
 * RÔLE :
 * Unique point d'entrée vers la base de faits. Chaque opération logique
 * (admettre un transfert, le mettre à jour, déposer un nettoyage…) prend
 * UN verrou global, mute les faits, rejoue les règles du site jusqu'au
 * point fixe, puis relit le résultat — le tout sous le même verrou.
 *
 * FONCTIONNEMENT :
 * - Mutex tokio : tenu à travers les await du grand livre, les opérations
 *   logiques sont donc strictement sérialisées
 * - Les règles s'évaluent dans l'ordre de leur enregistrement ; une passe
 *   qui ne change rien termine la boucle (garde-fou à 16 passes)
 * - Les doublons de transfert (mêmes URIs) ne sont pas admis comme faits
 *   mais comptent quand même comme intérêt pour la ressource visée
 * - Un STATUS terminal retire le fait et sa réservation du grand livre
 *
 * UTILITÉ DANS FLOWGATE :
 * 🎯 Garantit qu'un avis rendu reflète toutes les opérations qui l'ont
 *    précédé, sans entrelacement
 */

use crate::caps::CapTable;
use crate::entity::{
    Cleanup, Entity, Transfer, COMPLETED_STATUS, START_STATUS, STATUS_PROPERTY,
};
use crate::ledger::{AllocationError, AllocationLedger};
use crate::monitor::PassiveMonitor;
use crate::policy::{RuleContext, SiteRule};
use crate::registry::{ReleaseOutcome, ResourceRegistry};
use crate::store::{Fact, FactBase};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

const MAX_RULE_PASSES: usize = 16;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("fait {0} inconnu de la session")]
    UnknownFact(String),
    #[error("variable globale {0} inconnue")]
    UnknownGlobal(String),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Sort d'un transfert soumis
#[derive(Debug)]
pub enum TransferOutcome {
    /// Admis et avisé par les règles
    Admitted(Transfer),
    /// Mêmes URIs qu'un transfert déjà en base : non admis, mais son
    /// intérêt pour la ressource de destination est compté
    Duplicate(Transfer),
}

/// Sort d'une mise à jour de transfert
#[derive(Debug)]
pub enum TransferUpdate {
    /// Toujours actif, ré-avisé au besoin
    Advised(Transfer),
    /// STATUS=COMPLETED : fait et réservation retirés
    Completed(Transfer),
    /// STATUS terminal autre : fait et réservation retirés
    Failed(Transfer),
}

/// Sort d'un nettoyage déposé
#[derive(Debug)]
pub enum CleanupOutcome {
    /// Plus personne ne tient à la ressource : le nettoyage peut partir
    Actionable(Cleanup),
    /// Des jobs s'y intéressent encore : demande retenue, non conservée
    Withheld { remaining: usize },
}

struct SessionState {
    base: FactBase,
    registry: ResourceRegistry,
}

pub struct DecisionSession {
    state: Mutex<SessionState>,
    ledger: Arc<dyn AllocationLedger>,
    stream_caps: CapTable,
    rate_caps: CapTable,
    monitor: Box<dyn PassiveMonitor>,
    rules: Vec<Box<dyn SiteRule>>,
}

impl DecisionSession {
    pub fn new(
        ledger: Arc<dyn AllocationLedger>,
        stream_caps: CapTable,
        rate_caps: CapTable,
        monitor: Box<dyn PassiveMonitor>,
        rules: Vec<Box<dyn SiteRule>>,
    ) -> Self {
        Self {
            state: Mutex::new(SessionState {
                base: FactBase::new(),
                registry: ResourceRegistry::new(),
            }),
            ledger,
            stream_caps,
            rate_caps,
            monitor,
            rules,
        }
    }

    /// Rejoue les règles du site jusqu'à une passe sans modification
    async fn fire_rules(&self, state: &mut SessionState) -> Result<(), SessionError> {
        for _ in 0..MAX_RULE_PASSES {
            let mut changed = false;
            for rule in &self.rules {
                let mut ctx = RuleContext {
                    base: &mut state.base,
                    registry: &mut state.registry,
                    ledger: self.ledger.as_ref(),
                    stream_caps: &self.stream_caps,
                    rate_caps: &self.rate_caps,
                    monitor: self.monitor.as_ref(),
                };
                if rule.evaluate(&mut ctx).await? {
                    changed = true;
                }
            }
            if !changed {
                return Ok(());
            }
        }
        eprintln!("[session] ⚠️  règles non stabilisées après {MAX_RULE_PASSES} passes");
        Ok(())
    }

    fn reference_destination(state: &mut SessionState, transfer: &Transfer, job: &str) {
        if let Some((host, file)) = transfer.destination_resource_key() {
            state.registry.reference(&mut state.base, &host, &file, job);
        }
    }

    /// Admet un transfert : doublon écarté mais compté, sinon inséré,
    /// estampillé START, avisé par les règles et relu
    pub async fn insert_transfer(
        &self,
        mut transfer: Transfer,
    ) -> Result<TransferOutcome, SessionError> {
        let mut state = self.state.lock().await;

        if state.base.transfers().iter().any(|t| *t == transfer) {
            if !transfer.has_id() {
                transfer.set_id(Uuid::new_v4().to_string());
            }
            let job = transfer.id().unwrap_or_default().to_string();
            Self::reference_destination(&mut state, &transfer, &job);
            return Ok(TransferOutcome::Duplicate(transfer));
        }

        transfer.set_property(STATUS_PROPERTY, START_STATUS);
        let id = state.base.insert(Fact::Transfer(transfer));
        let referenced = match state.base.get(&id) {
            Some(Fact::Transfer(t)) => t.clone(),
            _ => return Err(SessionError::UnknownFact(id)),
        };
        Self::reference_destination(&mut state, &referenced, &id);

        self.fire_rules(&mut state).await?;
        match state.base.get(&id) {
            Some(Fact::Transfer(t)) => Ok(TransferOutcome::Admitted(t.clone())),
            _ => Err(SessionError::UnknownFact(id)),
        }
    }

    /// Met à jour un transfert connu. Un STATUS terminal retire le fait
    /// et sa réservation ; sinon les règles le ré-avisent au besoin.
    /// Retire un transfert terminé : fait, réservation et référence de
    /// ressource disparaissent ensemble
    async fn retire_transfer(
        &self,
        state: &mut SessionState,
        id: &str,
    ) -> Result<(), SessionError> {
        let stored = match state.base.get(id) {
            Some(Fact::Transfer(t)) => t.clone(),
            _ => return Err(SessionError::UnknownFact(id.to_string())),
        };
        state.base.retract(id);
        self.ledger.remove(id).await?;
        if let Some((host, file)) = stored.destination_resource_key() {
            state.registry.release(&mut state.base, &host, &file);
        }
        Ok(())
    }

    pub async fn update_transfer(
        &self,
        id: &str,
        mut transfer: Transfer,
    ) -> Result<TransferUpdate, SessionError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.base.get(id).is_none() {
            return Err(SessionError::UnknownFact(id.to_string()));
        }
        transfer.set_id(id.to_string());

        match transfer.property(STATUS_PROPERTY) {
            Some(COMPLETED_STATUS) => {
                self.retire_transfer(state, id).await?;
                Ok(TransferUpdate::Completed(transfer))
            }
            Some(status) if status != START_STATUS => {
                self.retire_transfer(state, id).await?;
                Ok(TransferUpdate::Failed(transfer))
            }
            _ => {
                state.base.update(id, Fact::Transfer(transfer));
                self.fire_rules(state).await?;
                match state.base.get(id) {
                    Some(Fact::Transfer(t)) => Ok(TransferUpdate::Advised(t.clone())),
                    _ => Err(SessionError::UnknownFact(id.to_string())),
                }
            }
        }
    }

    /// Retire un transfert sans le terminer proprement côté client
    pub async fn remove_transfer(&self, id: &str) -> Result<Transfer, SessionError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let transfer = match state.base.get(id) {
            Some(Fact::Transfer(t)) => t.clone(),
            _ => return Err(SessionError::UnknownFact(id.to_string())),
        };
        self.retire_transfer(state, id).await?;
        Ok(transfer)
    }

    pub async fn get_transfer(&self, id: &str) -> Option<Transfer> {
        let state = self.state.lock().await;
        match state.base.get(id) {
            Some(Fact::Transfer(t)) => Some(t.clone()),
            _ => None,
        }
    }

    /// Dépose une demande de nettoyage. Retenue (et abandonnée) tant que
    /// des jobs s'intéressent encore à la ressource visée.
    pub async fn insert_cleanup(
        &self,
        mut cleanup: Cleanup,
    ) -> Result<CleanupOutcome, SessionError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let outcome = match cleanup.resource_key() {
            Some((host, file)) => state.registry.release(&mut state.base, &host, &file),
            None => ReleaseOutcome::Untracked,
        };
        if let ReleaseOutcome::Withheld { remaining } = outcome {
            return Ok(CleanupOutcome::Withheld { remaining });
        }

        cleanup.set_property(STATUS_PROPERTY, START_STATUS);
        let id = state.base.insert(Fact::Cleanup(cleanup));
        self.fire_rules(state).await?;
        match state.base.get(&id) {
            Some(Fact::Cleanup(c)) => Ok(CleanupOutcome::Actionable(c.clone())),
            _ => Err(SessionError::UnknownFact(id)),
        }
    }

    /// Met à jour un nettoyage connu ; COMPLETED le retire de la base
    pub async fn update_cleanup(
        &self,
        id: &str,
        mut cleanup: Cleanup,
    ) -> Result<(Cleanup, bool), SessionError> {
        let mut state = self.state.lock().await;
        if state.base.get(id).is_none() {
            return Err(SessionError::UnknownFact(id.to_string()));
        }
        cleanup.set_id(id.to_string());
        if cleanup.property(STATUS_PROPERTY) == Some(COMPLETED_STATUS) {
            state.base.retract(id);
            return Ok((cleanup, true));
        }
        state.base.update(id, Fact::Cleanup(cleanup.clone()));
        Ok((cleanup, false))
    }

    pub async fn remove_cleanup(&self, id: &str) -> Result<Cleanup, SessionError> {
        let mut state = self.state.lock().await;
        let cleanup = match state.base.get(id) {
            Some(Fact::Cleanup(c)) => c.clone(),
            _ => return Err(SessionError::UnknownFact(id.to_string())),
        };
        state.base.retract(id);
        Ok(cleanup)
    }

    pub async fn get_cleanup(&self, id: &str) -> Option<Cleanup> {
        let state = self.state.lock().await;
        match state.base.get(id) {
            Some(Fact::Cleanup(c)) => Some(c.clone()),
            _ => None,
        }
    }

    pub async fn transfers(&self) -> Vec<Transfer> {
        let state = self.state.lock().await;
        let mut all = state.base.transfers();
        all.sort();
        all
    }

    pub async fn cleanups(&self) -> Vec<Cleanup> {
        let state = self.state.lock().await;
        let mut all = state.base.cleanups();
        all.sort();
        all
    }

    pub async fn resources(&self) -> Vec<crate::entity::Resource> {
        let state = self.state.lock().await;
        let mut all = state.base.resources();
        all.sort_by(|a, b| (&a.host, &a.file).cmp(&(&b.host, &b.file)));
        all
    }

    /// Pose une variable globale puis rejoue les règles : un nouveau
    /// défaut peut concerner des transferts encore sans avis
    pub async fn set_global(&self, name: &str, value: f64) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        state.base.set_global(name, value);
        self.fire_rules(&mut state).await
    }

    pub async fn get_global(&self, name: &str) -> Result<f64, SessionError> {
        let state = self.state.lock().await;
        state
            .base
            .get_global(name)
            .ok_or_else(|| SessionError::UnknownGlobal(name.to_string()))
    }

    /// Retire nos réservations du grand livre avant extinction
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let _state = self.state.lock().await;
        self.ledger.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{MAX_RATE_PROPERTY, MAX_STREAMS_PROPERTY};
    use crate::ledger::file::FileLedger;
    use crate::monitor::NullMonitor;
    use crate::policy::{
        AdmissionRule, DEFAULT_MAX_RATE_GLOBAL, DEFAULT_MAX_STREAMS_GLOBAL,
    };
    use tempfile::TempDir;
    use url::Url;

    async fn session(dir: &TempDir) -> DecisionSession {
        let session = DecisionSession::new(
            Arc::new(FileLedger::new(dir.path())),
            CapTable::parse(".* .* 12\n").unwrap(),
            CapTable::parse(".* .* 250\n").unwrap(),
            Box::new(NullMonitor),
            vec![Box::new(AdmissionRule)],
        );
        session
            .set_global(DEFAULT_MAX_STREAMS_GLOBAL, 6.0)
            .await
            .unwrap();
        session
            .set_global(DEFAULT_MAX_RATE_GLOBAL, 100.0)
            .await
            .unwrap();
        session
    }

    fn transfer(n: usize) -> Transfer {
        Transfer::new(
            Url::parse("gsiftp://server1.isi.edu/tmp/src/").unwrap(),
            Url::parse(&format!("gsiftp://client1.isi.edu/tmp/test{n}/")).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_admitted_transfer_is_stamped_and_advised() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        let outcome = session.insert_transfer(transfer(0)).await.unwrap();
        let TransferOutcome::Admitted(t) = outcome else {
            panic!("doublon inattendu");
        };
        assert!(t.has_id());
        assert_eq!(t.property(STATUS_PROPERTY), Some(START_STATUS));
        assert_eq!(t.property(MAX_STREAMS_PROPERTY), Some("6"));
        assert_eq!(t.property(MAX_RATE_PROPERTY), Some("100"));
    }

    #[tokio::test]
    async fn test_duplicate_is_rejected_but_counts_as_interest() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        session.insert_transfer(transfer(0)).await.unwrap();
        let outcome = session.insert_transfer(transfer(0)).await.unwrap();
        assert!(matches!(outcome, TransferOutcome::Duplicate(_)));

        // Un seul transfert en base, mais deux jobs sur la ressource
        assert_eq!(session.transfers().await.len(), 1);
        let resources = session.resources().await;
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].number_of_jobs, 2);
    }

    #[tokio::test]
    async fn test_completion_releases_the_reservation() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        // Plafond de débit 250, défaut 100 : 100 puis 100 puis 50
        let TransferOutcome::Admitted(first) =
            session.insert_transfer(transfer(0)).await.unwrap()
        else {
            panic!()
        };
        session.insert_transfer(transfer(1)).await.unwrap();

        let mut done = first.clone();
        done.properties.clear();
        done.set_property(STATUS_PROPERTY, COMPLETED_STATUS);
        let update = session
            .update_transfer(first.id().unwrap(), done)
            .await
            .unwrap();
        assert!(matches!(update, TransferUpdate::Completed(_)));

        // La capacité libérée profite au suivant
        let TransferOutcome::Admitted(third) =
            session.insert_transfer(transfer(2)).await.unwrap()
        else {
            panic!()
        };
        assert_eq!(third.property(MAX_RATE_PROPERTY), Some("100"));
    }

    #[tokio::test]
    async fn test_failed_status_is_distinguished() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        let TransferOutcome::Admitted(t) =
            session.insert_transfer(transfer(0)).await.unwrap()
        else {
            panic!()
        };
        let mut failed = t.clone();
        failed.properties.clear();
        failed.set_property(STATUS_PROPERTY, "FAILED");
        let update = session
            .update_transfer(t.id().unwrap(), failed)
            .await
            .unwrap();
        assert!(matches!(update, TransferUpdate::Failed(_)));
        assert!(session.transfers().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_transfer_is_an_error() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        let err = session
            .update_transfer("absent", transfer(0))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownFact(_)));
    }

    #[tokio::test]
    async fn test_cleanup_withheld_until_last_job() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        session.insert_transfer(transfer(0)).await.unwrap();
        session.insert_transfer(transfer(0)).await.unwrap(); // doublon compté

        let cleanup =
            Cleanup::new(Url::parse("gsiftp://client1.isi.edu/tmp/test0/").unwrap());
        let first = session.insert_cleanup(cleanup.clone()).await.unwrap();
        assert!(matches!(first, CleanupOutcome::Withheld { remaining: 1 }));
        // La demande retenue n'est pas conservée
        assert!(session.cleanups().await.is_empty());

        let second = session.insert_cleanup(cleanup).await.unwrap();
        let CleanupOutcome::Actionable(c) = second else {
            panic!("nettoyage encore retenu");
        };
        assert!(c.has_id());
        assert_eq!(c.property(STATUS_PROPERTY), Some(START_STATUS));
        assert_eq!(session.cleanups().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_of_untracked_resource_is_actionable() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        let cleanup =
            Cleanup::new(Url::parse("gsiftp://client9.isi.edu/tmp/inconnu/").unwrap());
        let outcome = session.insert_cleanup(cleanup).await.unwrap();
        assert!(matches!(outcome, CleanupOutcome::Actionable(_)));
    }

    #[tokio::test]
    async fn test_cleanup_completion_retracts_it() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        let cleanup =
            Cleanup::new(Url::parse("gsiftp://client9.isi.edu/tmp/seul/").unwrap());
        let CleanupOutcome::Actionable(c) = session.insert_cleanup(cleanup).await.unwrap()
        else {
            panic!()
        };
        let mut done = c.clone();
        done.set_property(STATUS_PROPERTY, COMPLETED_STATUS);
        let (_, completed) = session
            .update_cleanup(c.id().unwrap(), done)
            .await
            .unwrap();
        assert!(completed);
        assert!(session.cleanups().await.is_empty());
    }

    #[tokio::test]
    async fn test_stream_advice_full_negotiation_cycle() {
        // Plafond de flux 12, défaut 6, trois clients qui négocient
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;

        let admit = |outcome: TransferOutcome| match outcome {
            TransferOutcome::Admitted(t) => t,
            TransferOutcome::Duplicate(_) => panic!("doublon inattendu"),
        };
        let advised = |update: TransferUpdate| match update {
            TransferUpdate::Advised(t) => t,
            _ => panic!("mise à jour terminale inattendue"),
        };
        let streams = |t: &Transfer| {
            t.property(MAX_STREAMS_PROPERTY)
                .unwrap()
                .parse::<i64>()
                .unwrap()
        };

        let t1 = admit(session.insert_transfer(transfer(1)).await.unwrap());
        assert_eq!(streams(&t1), 6);
        let t2 = admit(session.insert_transfer(transfer(2)).await.unwrap());
        assert_eq!(streams(&t2), 6);

        // T1 rapporte 4 flux réels, avis en place : pas de recalcul
        let mut report = t1.clone();
        report.set_property("adjusted_streams", "4");
        let t1 = advised(
            session
                .update_transfer(t1.id().unwrap(), report)
                .await
                .unwrap(),
        );
        assert_eq!(streams(&t1), 6);

        // T1 redemande un avis frais : ses 4 flux exclus du calcul
        let mut fresh = t1.clone();
        fresh.properties.clear();
        let t1 = advised(
            session
                .update_transfer(t1.id().unwrap(), fresh)
                .await
                .unwrap(),
        );
        assert_eq!(streams(&t1), 6);

        // T2 rapporte 2 flux réels
        let mut report = t2.clone();
        report.set_property("adjusted_streams", "2");
        session
            .update_transfer(t2.id().unwrap(), report)
            .await
            .unwrap();

        // T3 arrive : 12 − (6 + 2) = 4
        let t3 = admit(session.insert_transfer(transfer(3)).await.unwrap());
        assert_eq!(streams(&t3), 4);

        // T1 termine, sa réservation disparaît
        let mut done = t1.clone();
        done.properties.clear();
        done.set_property(STATUS_PROPERTY, COMPLETED_STATUS);
        session
            .update_transfer(t1.id().unwrap(), done)
            .await
            .unwrap();

        // T3 rapporte 4 puis redemande : 12 − 2 = 10, borné au défaut 6
        let mut report = t3.clone();
        report.set_property("adjusted_streams", "4");
        let t3 = advised(
            session
                .update_transfer(t3.id().unwrap(), report)
                .await
                .unwrap(),
        );
        let mut fresh = t3.clone();
        fresh.properties.clear();
        let t3 = advised(
            session
                .update_transfer(t3.id().unwrap(), fresh)
                .await
                .unwrap(),
        );
        assert_eq!(streams(&t3), 6);
    }

    #[tokio::test]
    async fn test_completion_dereferences_the_destination() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        let TransferOutcome::Admitted(t) =
            session.insert_transfer(transfer(0)).await.unwrap()
        else {
            panic!()
        };
        assert_eq!(session.resources().await.len(), 1);

        let mut done = t.clone();
        done.properties.clear();
        done.set_property(STATUS_PROPERTY, COMPLETED_STATUS);
        session
            .update_transfer(t.id().unwrap(), done)
            .await
            .unwrap();
        // Dernière référence levée par la complétion elle-même
        assert!(session.resources().await.is_empty());
    }

    #[tokio::test]
    async fn test_globals_roundtrip_and_unknown() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        assert_eq!(
            session.get_global(DEFAULT_MAX_STREAMS_GLOBAL).await.unwrap(),
            6.0
        );
        let err = session.get_global("inconnue").await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownGlobal(_)));
    }
}
