/**
 * GRAND LIVRE SQL - Réservations dans une base SQLite partagée
 *
 * RÔLE :
 * Implémentation du grand livre sur SQLite, pour les sites où les
 * instances partagent une base plutôt qu'un répertoire.
 *
 * FONCTIONNEMENT :
 * - Deux tables : host (hostname unique, identifiants réutilisés) et
 *   resource_allocation (resource_id unique, FK vers host des deux côtés)
 * - Connexion unique sérialisée derrière un Mutex tokio ; WAL et
 *   busy_timeout activés pour tolérer les écrivains concurrents
 * - Les hôtes sont créés à la volée (get-or-create) et jamais supprimés
 * - get relit la table partagée ; close ne retire que les resource_id
 *   posés par cette instance
 */

use super::{AllocationError, AllocationLedger, ResourceAllocation};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Connection, Row, SqliteConnection};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SqlLedger {
    // Connexion unique : SQLite sérialise de toute façon les écritures
    conn: Mutex<SqliteConnection>,
    // resource_id des réservations posées par cette instance
    own: SyncMutex<HashSet<String>>,
}

impl SqlLedger {
    /// Ouvre (et crée au besoin) la base désignée par l'URL sqlite://
    pub async fn connect(database_url: &str) -> Result<Self, AllocationError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let mut conn = SqliteConnection::connect_with(&options).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS host (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 hostname TEXT NOT NULL UNIQUE
             )",
        )
        .execute(&mut conn)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS resource_allocation (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 resource_id TEXT NOT NULL UNIQUE,
                 source_uri TEXT NOT NULL,
                 source_host_id INTEGER NOT NULL REFERENCES host(id),
                 destination_uri TEXT NOT NULL,
                 destination_host_id INTEGER NOT NULL REFERENCES host(id),
                 transfer_streams INTEGER NOT NULL,
                 rate REAL NOT NULL
             )",
        )
        .execute(&mut conn)
        .await?;

        Ok(Self {
            conn: Mutex::new(conn),
            own: SyncMutex::new(HashSet::new()),
        })
    }

    /// Identifiant de l'hôte, créé à la volée s'il est inconnu
    async fn host_id(
        conn: &mut SqliteConnection,
        hostname: &str,
    ) -> Result<i64, AllocationError> {
        sqlx::query("INSERT INTO host (hostname) VALUES (?) ON CONFLICT(hostname) DO NOTHING")
            .bind(hostname)
            .execute(&mut *conn)
            .await?;
        let row = sqlx::query("SELECT id FROM host WHERE hostname = ?")
            .bind(hostname)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn write(
        &self,
        allocation: &ResourceAllocation,
        overwrite: bool,
    ) -> Result<(), AllocationError> {
        let mut conn = self.conn.lock().await;
        let source_id = Self::host_id(&mut conn, &allocation.source).await?;
        let destination_id = Self::host_id(&mut conn, &allocation.destination).await?;

        // La ligne peut venir d'une autre instance : elle ne devient pas
        // nôtre parce qu'on la met à jour
        let existed = sqlx::query("SELECT 1 FROM resource_allocation WHERE resource_id = ?")
            .bind(&allocation.id)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();

        let insert = "INSERT INTO resource_allocation
             (resource_id, source_uri, source_host_id,
              destination_uri, destination_host_id, transfer_streams, rate)
             VALUES (?, ?, ?, ?, ?, ?, ?)";
        let sql = if overwrite {
            format!(
                "{insert} ON CONFLICT(resource_id) DO UPDATE SET
                 source_uri = excluded.source_uri,
                 source_host_id = excluded.source_host_id,
                 destination_uri = excluded.destination_uri,
                 destination_host_id = excluded.destination_host_id,
                 transfer_streams = excluded.transfer_streams,
                 rate = excluded.rate"
            )
        } else {
            insert.to_string()
        };

        let result = sqlx::query(&sql)
            .bind(&allocation.id)
            .bind(&allocation.source)
            .bind(source_id)
            .bind(&allocation.destination)
            .bind(destination_id)
            .bind(allocation.streams)
            .bind(allocation.rate)
            .execute(&mut *conn)
            .await;
        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AllocationError::AlreadyExists(allocation.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        drop(conn);

        if !existed {
            self.own.lock().insert(allocation.id.clone());
        }
        Ok(())
    }

}

#[async_trait]
impl AllocationLedger for SqlLedger {
    async fn add(&self, allocation: &ResourceAllocation) -> Result<(), AllocationError> {
        self.write(allocation, false).await
    }

    async fn update(&self, allocation: &ResourceAllocation) -> Result<(), AllocationError> {
        if self.get(&allocation.id).await?.is_none() {
            return Err(AllocationError::NotFound(allocation.id.clone()));
        }
        self.write(allocation, true).await
    }

    async fn upsert(&self, allocation: &ResourceAllocation) -> Result<(), AllocationError> {
        self.write(allocation, true).await
    }

    async fn remove(&self, id: &str) -> Result<Option<ResourceAllocation>, AllocationError> {
        let removed = self.get(id).await?;
        let mut conn = self.conn.lock().await;
        sqlx::query("DELETE FROM resource_allocation WHERE resource_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        drop(conn);
        self.own.lock().remove(id);
        Ok(removed)
    }

    async fn get(&self, id: &str) -> Result<Option<ResourceAllocation>, AllocationError> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query(
            "SELECT ra.resource_id, s.hostname, d.hostname, ra.transfer_streams, ra.rate
             FROM resource_allocation ra
             JOIN host s ON ra.source_host_id = s.id
             JOIN host d ON ra.destination_host_id = d.id
             WHERE ra.resource_id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(|row| ResourceAllocation {
            id: row.get(0),
            source: row.get(1),
            destination: row.get(2),
            streams: row.get(3),
            rate: row.get(4),
        }))
    }

    async fn total_streams(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<i64, AllocationError> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query(
            "SELECT COALESCE(SUM(ra.transfer_streams), 0)
             FROM resource_allocation ra
             JOIN host s ON ra.source_host_id = s.id
             JOIN host d ON ra.destination_host_id = d.id
             WHERE s.hostname = ? AND d.hostname = ?",
        )
        .bind(source)
        .bind(destination)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn total_rate(&self, source: &str, destination: &str) -> Result<f64, AllocationError> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query(
            "SELECT COALESCE(SUM(ra.rate), 0.0)
             FROM resource_allocation ra
             JOIN host s ON ra.source_host_id = s.id
             JOIN host d ON ra.destination_host_id = d.id
             WHERE s.hostname = ? AND d.hostname = ?",
        )
        .bind(source)
        .bind(destination)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row.get::<f64, _>(0))
    }

    async fn count(&self, source: &str, destination: &str) -> Result<usize, AllocationError> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query(
            "SELECT COUNT(*)
             FROM resource_allocation ra
             JOIN host s ON ra.source_host_id = s.id
             JOIN host d ON ra.destination_host_id = d.id
             WHERE s.hostname = ? AND d.hostname = ?",
        )
        .bind(source)
        .bind(destination)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row.get::<i64, _>(0) as usize)
    }

    async fn close(&self) -> Result<(), AllocationError> {
        let ids: Vec<String> = {
            let mut own = self.own.lock();
            own.drain().collect()
        };
        let mut conn = self.conn.lock().await;
        for id in ids {
            if let Err(e) = sqlx::query("DELETE FROM resource_allocation WHERE resource_id = ?")
                .bind(&id)
                .execute(&mut *conn)
                .await
            {
                eprintln!("[ledger] ⚠️  suppression impossible de {id} : {e}");
            }
        }
        Ok(())
    }
}
