/**
 * CONFIGURATION FLOWGATE - Chargement YAML du paramétrage du site
 *
 * RÔLE :
 * Décrit tout ce qui varie d'un site à l'autre : adresse d'écoute,
 * défauts d'avis, support du grand livre, tables de plafonds et
 * observations du moniteur.
 *
 * FONCTIONNEMENT :
 * - Chemin du fichier dans FLOWGATE_CONFIG ; sans lui, défauts intégrés
 * - Tout champ absent prend sa valeur par défaut (serde)
 */

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

pub const CONFIG_ENV: &str = "FLOWGATE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("lecture de {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration invalide: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adresse d'écoute de l'API HTTP
    pub listen_addr: String,
    /// Avis par défaut : flux parallèles
    pub default_max_streams: i64,
    /// Avis par défaut : débit
    pub default_max_rate: f64,
    /// Support du grand livre partagé
    pub ledger: LedgerConfig,
    /// Table des plafonds de flux par paire d'hôtes
    pub stream_caps_file: Option<PathBuf>,
    /// Table des plafonds de débit par paire d'hôtes
    pub rate_caps_file: Option<PathBuf>,
    /// Observations du moniteur passif, si un moniteur alimente des tables
    pub monitor: Option<MonitorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedgerConfig {
    File { path: PathBuf },
    Sql { database_url: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub streams_file: Option<PathBuf>,
    pub rate_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8088".to_string(),
            default_max_streams: 1,
            default_max_rate: 1.0,
            ledger: LedgerConfig::File {
                path: PathBuf::from("./flowgate-ledger"),
            },
            stream_caps_file: None,
            rate_caps_file: None,
            monitor: None,
        }
    }
}

impl Config {
    /// Charge le fichier pointé par FLOWGATE_CONFIG, sinon les défauts
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                eprintln!("[config] lecture de {path}");
                Self::from_file(&PathBuf::from(path))
            }
            Err(_) => {
                eprintln!("[config] {CONFIG_ENV} absent, défauts intégrés");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(serde_yaml::from_str(&text)?)
    }
}
