/**
 * TABLE DES PLAFONDS - Plafonds par paire d'hôtes (source, destination)
 *
 * RÔLE :
 * Charge et interroge les plafonds du site : flux parallèles maximum et
 * bande passante maximum entre deux hôtes.
 *
 * FONCTIONNEMENT :
 * - Fichier texte : une entrée par ligne, trois champs séparés par des
 *   blancs : <expr-source> <expr-destination> <valeur>
 * - Lignes vides et lignes commençant par # ignorées
 * - Les expressions sont des regex ancrées ; la recherche essaie d'abord
 *   la correspondance exacte des deux hôtes, puis les regex dans l'ordre
 *   du fichier
 *
 * UTILITÉ DANS FLOWGATE :
 * 🎯 Bornes dures de l'algorithme d'admission (jamais dépassées)
 * 🎯 Permet des politiques larges ("*.isi.edu vers tout : 250 Mo/s")
 */

use regex::Regex;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapTableError {
    #[error("lecture du fichier de plafonds {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ligne {line} malformée (3 champs attendus): {text}")]
    Malformed { line: usize, text: String },
    #[error("ligne {line}: expression invalide: {source}")]
    BadExpression {
        line: usize,
        #[source]
        source: regex::Error,
    },
    #[error("ligne {line}: valeur non numérique: {text}")]
    BadValue { line: usize, text: String },
}

/// Une entrée de la table : deux expressions + le plafond associé
#[derive(Debug)]
struct CapEntry {
    source_text: String,
    destination_text: String,
    source: Regex,
    destination: Regex,
    value: f64,
}

/// Table de plafonds interrogeable par paire d'hôtes
#[derive(Debug, Default)]
pub struct CapTable {
    entries: Vec<CapEntry>,
}

impl CapTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Charge la table depuis un fichier d'expressions
    pub fn load(path: &Path) -> Result<Self, CapTableError> {
        let text = std::fs::read_to_string(path).map_err(|e| CapTableError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, CapTableError> {
        let mut entries = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 3 {
                return Err(CapTableError::Malformed {
                    line: i + 1,
                    text: line.to_string(),
                });
            }
            let value: f64 = fields[2].parse().map_err(|_| CapTableError::BadValue {
                line: i + 1,
                text: fields[2].to_string(),
            })?;
            let anchor = |expr: &str| format!("^(?:{expr})$");
            let source =
                Regex::new(&anchor(fields[0])).map_err(|e| CapTableError::BadExpression {
                    line: i + 1,
                    source: e,
                })?;
            let destination =
                Regex::new(&anchor(fields[1])).map_err(|e| CapTableError::BadExpression {
                    line: i + 1,
                    source: e,
                })?;
            entries.push(CapEntry {
                source_text: fields[0].to_string(),
                destination_text: fields[1].to_string(),
                source,
                destination,
                value,
            });
        }
        Ok(Self { entries })
    }

    /// Plafond pour la paire (source, destination).
    /// Correspondance exacte d'abord, puis regex dans l'ordre du fichier.
    pub fn lookup(&self, source_host: &str, destination_host: &str) -> Option<f64> {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.source_text == source_host && e.destination_text == destination_host)
        {
            return Some(entry.value);
        }
        self.entries
            .iter()
            .find(|e| e.source.is_match(source_host) && e.destination.is_match(destination_host))
            .map(|e| e.value)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let table = CapTable::parse(
            "# plafonds de test\n\nserver1.isi.edu client1.isi.edu 12\n",
        )
        .unwrap();
        assert_eq!(table.lookup("server1.isi.edu", "client1.isi.edu"), Some(12.0));
        assert_eq!(table.lookup("server2.isi.edu", "client1.isi.edu"), None);
    }

    #[test]
    fn test_exact_match_wins_over_earlier_wildcard() {
        let table = CapTable::parse(
            ".* .* 100\nserver1.isi.edu client1.isi.edu 12\n",
        )
        .unwrap();
        assert_eq!(table.lookup("server1.isi.edu", "client1.isi.edu"), Some(12.0));
        assert_eq!(table.lookup("x.isi.edu", "y.isi.edu"), Some(100.0));
    }

    #[test]
    fn test_regex_is_anchored() {
        let table = CapTable::parse("server.isi.edu client.isi.edu 8\n").unwrap();
        // Le point de la regex matche, mais pas un suffixe non couvert
        assert_eq!(table.lookup("serverXisi.edu", "client.isi.edu"), Some(8.0));
        assert_eq!(table.lookup("server.isi.edu.evil.org", "client.isi.edu"), None);
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        let err = CapTable::parse("server1.isi.edu 12\n").unwrap_err();
        assert!(matches!(err, CapTableError::Malformed { line: 1, .. }));

        let err = CapTable::parse("a b douze\n").unwrap_err();
        assert!(matches!(err, CapTableError::BadValue { line: 1, .. }));
    }

    #[test]
    fn test_fractional_cap_value() {
        let table = CapTable::parse(".* .* 62.5\n").unwrap();
        assert_eq!(table.lookup("a", "b"), Some(62.5));
    }
}
