/**
 * ENTITÉS FLOWGATE - Faits manipulés par le moteur de décision
 *
 * RÔLE :
 * Ce module définit les trois entités du service : Transfer (demande d'avis
 * sur un transfert), Cleanup (demande de nettoyage d'une destination) et
 * Resource (ressource de destination partagée, comptée par référence).
 *
 * FONCTIONNEMENT :
 * - Chaque entité porte un id unique (UUID, assigné une seule fois) + un sac
 *   de propriétés string→string (dernière écriture gagne)
 * - L'égalité d'un Transfer est structurelle sur (source, destination), PAS
 *   sur l'id : c'est ce qui permet de détecter les doublons de soumission
 * - La clé de ressource (host, path) est dérivée des URIs, avec le cas
 *   spécial file:// + local_file_host pour les transferts 2-parties
 *
 * UTILITÉ DANS FLOWGATE :
 * 🎯 Faits insérés dans la DecisionSession, retournés enrichis aux clients
 * 🎯 Propriétés d'avis : max_streams / max_rate posées par la politique
 * 🎯 Propriétés d'ajustement : adjusted_streams / adjusted_rate des clients
 */

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use url::Url;

/// Clés de propriétés comprises par le cœur du service
pub const DATA_VOLUME_PROPERTY: &str = "data_volume";
pub const LOCAL_FILE_HOST_PROPERTY: &str = "local_file_host";
pub const STATUS_PROPERTY: &str = "STATUS";
pub const MAX_STREAMS_PROPERTY: &str = "max_streams";
pub const MAX_RATE_PROPERTY: &str = "max_rate";
pub const ADJUSTED_STREAMS_PROPERTY: &str = "adjusted_streams";
pub const ADJUSTED_RATE_PROPERTY: &str = "adjusted_rate";
pub const START_STATUS: &str = "START";
pub const COMPLETED_STATUS: &str = "COMPLETED";

/// Comportement commun des entités : id assigné une fois + sac de propriétés
pub trait Entity {
    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);
    fn properties(&self) -> &HashMap<String, String>;
    fn properties_mut(&mut self) -> &mut HashMap<String, String>;

    fn has_id(&self) -> bool {
        self.id().is_some()
    }

    fn property(&self, name: &str) -> Option<&str> {
        self.properties().get(name).map(|s| s.as_str())
    }

    fn set_property(&mut self, name: &str, value: &str) {
        self.properties_mut()
            .insert(name.to_string(), value.to_string());
    }
}

macro_rules! impl_entity {
    ($t:ty) => {
        impl Entity for $t {
            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }
            fn set_id(&mut self, id: String) {
                self.id = Some(id);
            }
            fn properties(&self) -> &HashMap<String, String> {
                &self.properties
            }
            fn properties_mut(&mut self) -> &mut HashMap<String, String> {
                &mut self.properties
            }
        }
    };
}

/// Transfert soumis au service pour avis (source → destination)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: Url,
    pub destination: Url,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl_entity!(Transfer);

impl Transfer {
    pub fn new(source: Url, destination: Url) -> Self {
        Self {
            id: None,
            source,
            destination,
            properties: HashMap::new(),
        }
    }

    /// Clé de ressource de la destination : (host, path).
    /// Cas file:// : le host vient de la propriété local_file_host.
    pub fn destination_resource_key(&self) -> Option<(String, String)> {
        resource_key(
            &self.destination,
            self.property(LOCAL_FILE_HOST_PROPERTY),
        )
    }

    /// Hôte source effectif pour l'agrégation par paire d'hôtes
    pub fn source_host(&self) -> Option<String> {
        effective_host(&self.source, self.property(LOCAL_FILE_HOST_PROPERTY))
    }

    /// Hôte destination effectif pour l'agrégation par paire d'hôtes
    pub fn destination_host(&self) -> Option<String> {
        effective_host(&self.destination, self.property(LOCAL_FILE_HOST_PROPERTY))
    }
}

/// Égalité structurelle : deux transferts sont identiques si mêmes URIs,
/// indépendamment de l'id (détection de doublons)
impl PartialEq for Transfer {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.destination == other.destination
    }
}

impl Eq for Transfer {}

impl PartialOrd for Transfer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Transfer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.source
            .as_str()
            .cmp(other.source.as_str())
            .then_with(|| self.destination.as_str().cmp(other.destination.as_str()))
    }
}

/// Demande de nettoyage d'une ressource précédemment transférée
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cleanup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub uri: Url,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl_entity!(Cleanup);

impl Cleanup {
    pub fn new(uri: Url) -> Self {
        Self {
            id: None,
            uri,
            properties: HashMap::new(),
        }
    }

    /// Clé de la ressource visée par le nettoyage
    pub fn resource_key(&self) -> Option<(String, String)> {
        resource_key(&self.uri, self.property(LOCAL_FILE_HOST_PROPERTY))
    }
}

impl PartialEq for Cleanup {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for Cleanup {}

impl PartialOrd for Cleanup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cleanup {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uri.as_str().cmp(other.uri.as_str())
    }
}

/// Ressource de destination partagée entre plusieurs jobs.
/// Jamais créée directement par les clients : dérivée des transferts.
/// number_of_jobs compte les références, jobs les jobs associés ;
/// le compteur peut dépasser la taille de l'ensemble
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub host: String,
    pub file: String,
    pub number_of_jobs: usize,
    pub jobs: HashSet<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl_entity!(Resource);

impl Resource {
    pub fn new(host: String, file: String) -> Self {
        Self {
            id: None,
            host,
            file,
            number_of_jobs: 0,
            jobs: HashSet::new(),
            properties: HashMap::new(),
        }
    }
}

/// Hôte effectif d'une URI : le host de l'URI, ou local_file_host pour file://
fn effective_host(uri: &Url, local_file_host: Option<&str>) -> Option<String> {
    match uri.host_str() {
        Some(h) if !h.is_empty() => Some(h.to_string()),
        _ => local_file_host.map(|h| h.to_string()),
    }
}

/// Dérivation de la clé de ressource (host, path) d'une URI
fn resource_key(uri: &Url, local_file_host: Option<&str>) -> Option<(String, String)> {
    let host = effective_host(uri, local_file_host)?;
    Some((host, uri.path().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_transfer_structural_equality_ignores_id() {
        let mut a = Transfer::new(
            url("gsiftp://server1.isi.edu/tmp/test1/"),
            url("gsiftp://client1.isi.edu/tmp/test1/"),
        );
        let mut b = a.clone();
        a.set_id("id-a".to_string());
        b.set_id("id-b".to_string());
        assert_eq!(a, b);

        let c = Transfer::new(
            url("gsiftp://server1.isi.edu/tmp/test1/"),
            url("gsiftp://client2.isi.edu/tmp/test1/"),
        );
        assert_ne!(a, c);
    }

    #[test]
    fn test_transfer_ordering_is_lexicographic() {
        let a = Transfer::new(
            url("gsiftp://a.isi.edu/x/"),
            url("gsiftp://b.isi.edu/x/"),
        );
        let b = Transfer::new(
            url("gsiftp://a.isi.edu/x/"),
            url("gsiftp://c.isi.edu/x/"),
        );
        let c = Transfer::new(
            url("gsiftp://b.isi.edu/x/"),
            url("gsiftp://a.isi.edu/x/"),
        );
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_destination_resource_key_third_party() {
        let t = Transfer::new(
            url("gsiftp://server1.isi.edu/tmp/test1/"),
            url("gsiftp://client1.isi.edu/tmp/test1/"),
        );
        assert_eq!(
            t.destination_resource_key(),
            Some(("client1.isi.edu".to_string(), "/tmp/test1/".to_string()))
        );
    }

    #[test]
    fn test_destination_resource_key_local_file() {
        let mut t = Transfer::new(
            url("gsiftp://server1.isi.edu/tmp/test1/"),
            url("file:///tmp/test1/"),
        );
        t.set_property(LOCAL_FILE_HOST_PROPERTY, "client1.isi.edu");
        assert_eq!(
            t.destination_resource_key(),
            Some(("client1.isi.edu".to_string(), "/tmp/test1/".to_string()))
        );
        assert_eq!(t.destination_host().as_deref(), Some("client1.isi.edu"));
    }

    #[test]
    fn test_source_host_local_file_upload() {
        let mut t = Transfer::new(
            url("file:///tmp/test1/"),
            url("gsiftp://clienta.isi.edu/tmp/test1/"),
        );
        t.set_property(LOCAL_FILE_HOST_PROPERTY, "servera.isi.edu");
        assert_eq!(t.source_host().as_deref(), Some("servera.isi.edu"));
        assert_eq!(t.destination_host().as_deref(), Some("clienta.isi.edu"));
    }

    #[test]
    fn test_properties_last_write_wins() {
        let mut t = Transfer::new(
            url("gsiftp://a.isi.edu/x/"),
            url("gsiftp://b.isi.edu/x/"),
        );
        t.set_property(STATUS_PROPERTY, START_STATUS);
        t.set_property(STATUS_PROPERTY, COMPLETED_STATUS);
        assert_eq!(t.property(STATUS_PROPERTY), Some(COMPLETED_STATUS));
    }

    #[test]
    fn test_cleanup_ordering_on_uri() {
        let a = Cleanup::new(url("gsiftp://a.isi.edu/x/"));
        let b = Cleanup::new(url("gsiftp://b.isi.edu/x/"));
        assert!(a < b);
        assert_eq!(a, a.clone());
    }
}
