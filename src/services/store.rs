//! Accesso ai prodotti dal punto di vista della pipeline

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{products as db_products, DbPool};
use crate::error::{AppError, Result};
use crate::models::JobId;

/// Archivio durevole dei prodotti.
///
/// Le implementazioni devono essere sicure per l'uso concorrente: lo stesso
/// handle viene condiviso da tutti i job in esecuzione senza lock esterni.
/// Gli errori distinguono `AppError::NotFound` dagli errori di I/O.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn exists(&self, id: JobId) -> Result<bool>;

    async fn source_images(&self, id: JobId) -> Result<Vec<String>>;

    /// Sostituzione atomica dell'intero insieme elaborato
    async fn replace_processed_images(
        &self,
        id: JobId,
        paths: &[String],
        updated_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// `ProductStore` su SQLite, il pool gestisce la concorrenza internamente
#[derive(Clone)]
pub struct SqliteProductStore {
    pool: DbPool,
}

impl std::fmt::Debug for SqliteProductStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteProductStore").finish_non_exhaustive()
    }
}

impl SqliteProductStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ProductStore for SqliteProductStore {
    async fn exists(&self, id: JobId) -> Result<bool> {
        Ok(db_products::product_exists(&self.pool, id.0).await?)
    }

    async fn source_images(&self, id: JobId) -> Result<Vec<String>> {
        db_products::get_product_images(&self.pool, id.0)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("prodotto {}", id)))
    }

    async fn replace_processed_images(
        &self,
        id: JobId,
        paths: &[String],
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated =
            db_products::replace_processed_images(&self.pool, id.0, paths, updated_at).await?;

        if updated == 0 {
            return Err(AppError::NotFound(format!("prodotto {}", id)));
        }

        tracing::info!("Aggiornate {} immagini per il prodotto {}", paths.len(), id);
        Ok(())
    }
}
