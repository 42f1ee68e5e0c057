/**
 * GRAND LIVRE FICHIERS - Un fichier par réservation dans un répertoire partagé
 *
 * RÔLE :
 * Implémentation du grand livre sur un système de fichiers partagé (NFS ou
 * local). Chaque réservation vit dans base/<source>/<destination>/<id>.rae,
 * une ligne au format texte plat.
 *
 * FONCTIONNEMENT :
 * - add crée les répertoires manquants puis écrit le fichier ; un fichier
 *   déjà présent fait échouer l'ajout (create_new)
 * - Les agrégats listent base/<source>/<destination>/ et additionnent les
 *   enregistrements lisibles ; un fichier illisible vaut 0 et se journalise
 * - Un index mémoire id → chemin retient les réservations de CETTE
 *   instance ; get et close ne regardent que lui
 */

use super::{AllocationError, AllocationLedger, ResourceAllocation};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const RECORD_EXTENSION: &str = "rae";

pub struct FileLedger {
    base: PathBuf,
    // Réservations posées par cette instance : id → chemin du fichier
    own: Mutex<HashMap<String, PathBuf>>,
}

impl FileLedger {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            own: Mutex::new(HashMap::new()),
        }
    }

    fn record_path(&self, allocation: &ResourceAllocation) -> PathBuf {
        self.base
            .join(&allocation.source)
            .join(&allocation.destination)
            .join(format!("{}.{}", allocation.id, RECORD_EXTENSION))
    }

    async fn write_record(
        &self,
        allocation: &ResourceAllocation,
        create_new: bool,
    ) -> Result<(), AllocationError> {
        let path = self.record_path(allocation);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut options = fs::OpenOptions::new();
        options.write(true);
        if create_new {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let result = options.open(&path).await;
        match result {
            Ok(file) => {
                use tokio::io::AsyncWriteExt;
                let mut file = file;
                file.write_all(format!("{allocation}\n").as_bytes()).await?;
                file.flush().await?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(AllocationError::AlreadyExists(allocation.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        self.own
            .lock()
            .insert(allocation.id.clone(), path);
        Ok(())
    }

    /// Additionne les enregistrements de base/<source>/<destination>/.
    /// Chaque fichier illisible est journalisé et compte pour zéro.
    async fn fold_pair<F>(
        &self,
        source: &str,
        destination: &str,
        mut add: F,
    ) -> Result<(), AllocationError>
    where
        F: FnMut(&ResourceAllocation),
    {
        let dir = self.base.join(source).join(destination);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // Paire jamais vue : aucun enregistrement, agrégat nul
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path).await {
                Ok(allocation) => add(&allocation),
                Err(e) => {
                    eprintln!(
                        "[ledger] ⚠️  enregistrement ignoré {}: {e}",
                        path.display()
                    );
                }
            }
        }
        Ok(())
    }
}

async fn read_record(path: &Path) -> Result<ResourceAllocation, AllocationError> {
    let text = fs::read_to_string(path).await?;
    text.parse()
}

#[async_trait]
impl AllocationLedger for FileLedger {
    async fn add(&self, allocation: &ResourceAllocation) -> Result<(), AllocationError> {
        self.write_record(allocation, true).await
    }

    async fn update(&self, allocation: &ResourceAllocation) -> Result<(), AllocationError> {
        if !self.own.lock().contains_key(&allocation.id) {
            return Err(AllocationError::NotFound(allocation.id.clone()));
        }
        self.write_record(allocation, false).await
    }

    async fn upsert(&self, allocation: &ResourceAllocation) -> Result<(), AllocationError> {
        self.write_record(allocation, false).await
    }

    async fn remove(&self, id: &str) -> Result<Option<ResourceAllocation>, AllocationError> {
        let path = self.own.lock().remove(id);
        let Some(path) = path else {
            return Ok(None);
        };
        let removed = match read_record(&path).await {
            Ok(allocation) => Some(allocation),
            Err(_) => None,
        };
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(removed)
    }

    async fn get(&self, id: &str) -> Result<Option<ResourceAllocation>, AllocationError> {
        let path = self.own.lock().get(id).cloned();
        match path {
            Some(path) => match read_record(&path).await {
                Ok(allocation) => Ok(Some(allocation)),
                Err(AllocationError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            None => Ok(None),
        }
    }

    async fn total_streams(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<i64, AllocationError> {
        let mut total = 0i64;
        self.fold_pair(source, destination, |a| total += a.streams)
            .await?;
        Ok(total)
    }

    async fn total_rate(&self, source: &str, destination: &str) -> Result<f64, AllocationError> {
        let mut total = 0f64;
        self.fold_pair(source, destination, |a| total += a.rate)
            .await?;
        Ok(total)
    }

    async fn count(&self, source: &str, destination: &str) -> Result<usize, AllocationError> {
        let mut count = 0usize;
        self.fold_pair(source, destination, |_| count += 1).await?;
        Ok(count)
    }

    async fn close(&self) -> Result<(), AllocationError> {
        let paths: Vec<PathBuf> = {
            let mut own = self.own.lock();
            own.drain().map(|(_, path)| path).collect()
        };
        for path in paths {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    eprintln!(
                        "[ledger] ⚠️  suppression impossible de {} : {e}",
                        path.display()
                    );
                }
            }
        }
        Ok(())
    }
}
