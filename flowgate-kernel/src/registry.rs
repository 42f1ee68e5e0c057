/**
 * REGISTRE DES RESSOURCES - Comptage de références des destinations
 *
 * RÔLE :
 * Suit combien de jobs s'intéressent encore à chaque ressource de
 * destination (host, path). Tant qu'il en reste, les demandes de
 * nettoyage de cette ressource sont retenues.
 *
 * FONCTIONNEMENT :
 * - reference() incrémente le compteur à CHAQUE appel : on compte des
 *   références, pas des jobs distincts (un job qui référence deux fois
 *   la même ressource devra la libérer deux fois)
 * - release() décrémente et lève une association de job quand le compteur
 *   passe sous la taille de l'ensemble ; à zéro la ressource est retirée
 *   de la base et le nettoyage devient exécutable
 * - Le registre n'indexe que les clés → ids de faits : les ressources
 *   elles-mêmes vivent dans la FactBase
 */

use crate::entity::Resource;
use crate::store::{Fact, FactBase};
use std::collections::HashMap;

/// Sort d'une demande de libération d'une ressource
#[derive(Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Des jobs s'y intéressent encore : nettoyage retenu
    Withheld { remaining: usize },
    /// Dernière référence levée : nettoyage exécutable, ressource retirée
    Released,
    /// Ressource inconnue du registre : rien à retenir
    Untracked,
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    // (host, path) → id du fait Resource dans la FactBase
    index: HashMap<(String, String), String>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre une référence sur la ressource (host, file) : +1 à
    /// chaque appel. Crée le fait Resource à la première. Retourne son id.
    pub fn reference(
        &mut self,
        base: &mut FactBase,
        host: &str,
        file: &str,
        job: &str,
    ) -> String {
        let key = (host.to_string(), file.to_string());
        if let Some(id) = self.index.get(&key) {
            if let Some(Fact::Resource(resource)) = base.get_mut(id) {
                resource.number_of_jobs += 1;
                resource.jobs.insert(job.to_string());
                return id.clone();
            }
        }
        let mut resource = Resource::new(host.to_string(), file.to_string());
        resource.number_of_jobs = 1;
        resource.jobs.insert(job.to_string());
        let id = base.insert(Fact::Resource(resource));
        self.index.insert(key, id.clone());
        id
    }

    /// Lève une référence sur la ressource (host, file)
    pub fn release(&mut self, base: &mut FactBase, host: &str, file: &str) -> ReleaseOutcome {
        let key = (host.to_string(), file.to_string());
        let Some(id) = self.index.get(&key).cloned() else {
            return ReleaseOutcome::Untracked;
        };
        let remaining = match base.get_mut(&id) {
            Some(Fact::Resource(resource)) => {
                resource.number_of_jobs = resource.number_of_jobs.saturating_sub(1);
                // Le compteur passe sous l'ensemble : une association tombe
                if resource.number_of_jobs < resource.jobs.len() {
                    let gone = resource.jobs.iter().next().cloned();
                    if let Some(job) = gone {
                        resource.jobs.remove(&job);
                    }
                }
                resource.number_of_jobs
            }
            _ => 0,
        };
        if remaining == 0 {
            base.retract(&id);
            self.index.remove(&key);
            ReleaseOutcome::Released
        } else {
            ReleaseOutcome::Withheld { remaining }
        }
    }

    /// Nombre de jobs encore intéressés par la ressource
    pub fn job_count(&self, base: &FactBase, host: &str, file: &str) -> usize {
        let key = (host.to_string(), file.to_string());
        self.index
            .get(&key)
            .and_then(|id| match base.get(id) {
                Some(Fact::Resource(resource)) => Some(resource.number_of_jobs),
                _ => None,
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reference_creates_resource_fact() {
        let mut base = FactBase::new();
        let mut registry = ResourceRegistry::new();
        let id = registry.reference(&mut base, "client1.isi.edu", "/tmp/test1/", "job-1");
        assert_eq!(registry.job_count(&base, "client1.isi.edu", "/tmp/test1/"), 1);
        assert!(matches!(base.get(&id), Some(Fact::Resource(_))));
    }

    #[test]
    fn test_distinct_jobs_accumulate() {
        let mut base = FactBase::new();
        let mut registry = ResourceRegistry::new();
        registry.reference(&mut base, "c.isi.edu", "/d/", "job-1");
        registry.reference(&mut base, "c.isi.edu", "/d/", "job-2");
        registry.reference(&mut base, "c.isi.edu", "/d/", "job-3");
        assert_eq!(registry.job_count(&base, "c.isi.edu", "/d/"), 3);
    }

    #[test]
    fn test_same_job_referencing_twice_counts_twice() {
        let mut base = FactBase::new();
        let mut registry = ResourceRegistry::new();
        registry.reference(&mut base, "c.isi.edu", "/d/", "job-1");
        registry.reference(&mut base, "c.isi.edu", "/d/", "job-1");
        assert_eq!(registry.job_count(&base, "c.isi.edu", "/d/"), 2);

        assert_eq!(
            registry.release(&mut base, "c.isi.edu", "/d/"),
            ReleaseOutcome::Withheld { remaining: 1 }
        );
        assert_eq!(
            registry.release(&mut base, "c.isi.edu", "/d/"),
            ReleaseOutcome::Released
        );
    }

    #[test]
    fn test_release_withholds_until_last_reference() {
        let mut base = FactBase::new();
        let mut registry = ResourceRegistry::new();
        registry.reference(&mut base, "c.isi.edu", "/d/", "job-1");
        registry.reference(&mut base, "c.isi.edu", "/d/", "job-2");

        assert_eq!(
            registry.release(&mut base, "c.isi.edu", "/d/"),
            ReleaseOutcome::Withheld { remaining: 1 }
        );
        assert_eq!(
            registry.release(&mut base, "c.isi.edu", "/d/"),
            ReleaseOutcome::Released
        );
        // La ressource a disparu de la base
        assert!(base.resources().is_empty());
        assert_eq!(
            registry.release(&mut base, "c.isi.edu", "/d/"),
            ReleaseOutcome::Untracked
        );
    }

    #[test]
    fn test_untracked_resource_is_not_withheld() {
        let mut base = FactBase::new();
        let mut registry = ResourceRegistry::new();
        assert_eq!(
            registry.release(&mut base, "inconnu.isi.edu", "/x/"),
            ReleaseOutcome::Untracked
        );
    }
}
