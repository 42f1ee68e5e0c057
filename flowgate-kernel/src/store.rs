/**
 * FACT BASE - Mémoire de travail du moteur de décision
 *
 * RÔLE :
 * Conserve tous les faits connus du service (transferts, nettoyages,
 * ressources) ainsi que les variables globales numériques consultées par
 * les règles (default_max_streams, default_max_rate).
 *
 * FONCTIONNEMENT :
 * - Chaque fait reçoit un id UUID à l'insertion s'il n'en a pas déjà un
 * - insert/update/retract par id ; lecture par type de fait
 * - Les variables globales sont un petit dictionnaire nom → f64
 *
 * UTILITÉ DANS FLOWGATE :
 * 🎯 Unique source de vérité des faits pendant une évaluation de règles
 * 🎯 Jamais accédée directement par les clients : toujours via la session
 */

use crate::entity::{Cleanup, Entity, Resource, Transfer};
use std::collections::HashMap;
use uuid::Uuid;

/// Fait manipulable par les règles du site
#[derive(Debug, Clone)]
pub enum Fact {
    Transfer(Transfer),
    Cleanup(Cleanup),
    Resource(Resource),
}

impl Fact {
    pub fn id(&self) -> Option<&str> {
        match self {
            Fact::Transfer(t) => t.id(),
            Fact::Cleanup(c) => c.id(),
            Fact::Resource(r) => r.id(),
        }
    }

    fn assign_id_if_absent(&mut self) {
        let fresh = Uuid::new_v4().to_string();
        match self {
            Fact::Transfer(t) if !t.has_id() => t.set_id(fresh),
            Fact::Cleanup(c) if !c.has_id() => c.set_id(fresh),
            Fact::Resource(r) if !r.has_id() => r.set_id(fresh),
            _ => {}
        }
    }
}

/// Mémoire de travail : faits indexés par id + variables globales
#[derive(Debug, Default)]
pub struct FactBase {
    facts: HashMap<String, Fact>,
    globals: HashMap<String, f64>,
}

impl FactBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère un fait, en lui assignant un id s'il n'en a pas.
    /// Retourne l'id sous lequel le fait est mémorisé.
    pub fn insert(&mut self, mut fact: Fact) -> String {
        fact.assign_id_if_absent();
        let id = fact
            .id()
            .map(|s| s.to_string())
            .unwrap_or_default();
        self.facts.insert(id.clone(), fact);
        id
    }

    /// Remplace le fait portant cet id. Retourne false si inconnu.
    pub fn update(&mut self, id: &str, fact: Fact) -> bool {
        if !self.facts.contains_key(id) {
            return false;
        }
        self.facts.insert(id.to_string(), fact);
        true
    }

    /// Retire le fait portant cet id. Retourne false si inconnu.
    pub fn retract(&mut self, id: &str) -> bool {
        self.facts.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Fact> {
        self.facts.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Fact> {
        self.facts.get_mut(id)
    }

    /// Tous les transferts de la base, ordre non spécifié
    pub fn transfers(&self) -> Vec<Transfer> {
        self.facts
            .values()
            .filter_map(|f| match f {
                Fact::Transfer(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    /// Tous les nettoyages de la base, ordre non spécifié
    pub fn cleanups(&self) -> Vec<Cleanup> {
        self.facts
            .values()
            .filter_map(|f| match f {
                Fact::Cleanup(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Toutes les ressources de la base, ordre non spécifié
    pub fn resources(&self) -> Vec<Resource> {
        self.facts
            .values()
            .filter_map(|f| match f {
                Fact::Resource(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn set_global(&mut self, name: &str, value: f64) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn get_global(&self, name: &str) -> Option<f64> {
        self.globals.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Transfer;
    use url::Url;

    fn transfer(src: &str, dst: &str) -> Transfer {
        Transfer::new(Url::parse(src).unwrap(), Url::parse(dst).unwrap())
    }

    #[test]
    fn test_insert_assigns_id_once() {
        let mut base = FactBase::new();
        let id = base.insert(Fact::Transfer(transfer(
            "gsiftp://a.isi.edu/x/",
            "gsiftp://b.isi.edu/x/",
        )));
        assert!(!id.is_empty());

        let mut t = transfer("gsiftp://a.isi.edu/y/", "gsiftp://b.isi.edu/y/");
        t.set_id("fixed".to_string());
        let id2 = base.insert(Fact::Transfer(t));
        assert_eq!(id2, "fixed");
    }

    #[test]
    fn test_update_unknown_id_is_refused() {
        let mut base = FactBase::new();
        let ok = base.update(
            "absent",
            Fact::Transfer(transfer("gsiftp://a.isi.edu/x/", "gsiftp://b.isi.edu/x/")),
        );
        assert!(!ok);
    }

    #[test]
    fn test_retract_then_get() {
        let mut base = FactBase::new();
        let id = base.insert(Fact::Transfer(transfer(
            "gsiftp://a.isi.edu/x/",
            "gsiftp://b.isi.edu/x/",
        )));
        assert!(base.get(&id).is_some());
        assert!(base.retract(&id));
        assert!(base.get(&id).is_none());
        assert!(!base.retract(&id));
    }

    #[test]
    fn test_globals_roundtrip() {
        let mut base = FactBase::new();
        assert_eq!(base.get_global("default_max_rate"), None);
        base.set_global("default_max_rate", 62.5);
        assert_eq!(base.get_global("default_max_rate"), Some(62.5));
        base.set_global("default_max_rate", 100.0);
        assert_eq!(base.get_global("default_max_rate"), Some(100.0));
    }
}
