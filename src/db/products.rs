//! Modulo per la gestione dei prodotti nel database

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::DbPool;

/// Record prodotto nel database
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProductRecord {
    pub product_id: i64,
    pub user_id: i64,
    pub product_name: String,
    pub product_description: String,
    pub product_images: String,
    pub compressed_product_images: Option<String>,
    pub product_price: f64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl ProductRecord {
    pub fn source_images(&self) -> Result<Vec<String>, sqlx::Error> {
        decode_list(&self.product_images)
    }

    pub fn processed_images(&self) -> Result<Vec<String>, sqlx::Error> {
        match &self.compressed_product_images {
            Some(raw) => decode_list(raw),
            None => Ok(Vec::new()),
        }
    }
}

/// Dati per l'inserimento di un nuovo prodotto
#[derive(Debug, Clone)]
pub struct NewProduct<'a> {
    pub user_id: i64,
    pub name: &'a str,
    pub description: &'a str,
    pub price: f64,
    pub images: &'a [String],
}

fn encode_list(items: &[String]) -> Result<String, sqlx::Error> {
    serde_json::to_string(items).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn decode_list(raw: &str) -> Result<Vec<String>, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Inserisce un prodotto e restituisce il suo ID
pub async fn insert_product(pool: &DbPool, product: &NewProduct<'_>) -> Result<i64, sqlx::Error> {
    let images = encode_list(product.images)?;
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO products (
            user_id, product_name, product_description, product_images,
            product_price, created_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(product.user_id)
    .bind(product.name)
    .bind(product.description)
    .bind(&images)
    .bind(product.price)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn product_exists(pool: &DbPool, product_id: i64) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE product_id = ?")
        .bind(product_id)
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

/// Ottieni un prodotto per ID
pub async fn get_product(
    pool: &DbPool,
    product_id: i64,
) -> Result<Option<ProductRecord>, sqlx::Error> {
    sqlx::query_as::<_, ProductRecord>(
        r#"
        SELECT product_id, user_id, product_name, product_description, product_images,
               compressed_product_images, product_price, created_at, updated_at
        FROM products WHERE product_id = ?
        "#,
    )
    .bind(product_id)
    .fetch_optional(pool)
    .await
}

/// Immagini sorgente in ordine di inserimento, `None` se il prodotto non esiste
pub async fn get_product_images(
    pool: &DbPool,
    product_id: i64,
) -> Result<Option<Vec<String>>, sqlx::Error> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT product_images FROM products WHERE product_id = ?")
            .bind(product_id)
            .fetch_optional(pool)
            .await?;

    raw.map(|r| decode_list(&r)).transpose()
}

/// Sostituisce (non unisce) le immagini elaborate. Restituisce le righe aggiornate.
pub async fn replace_processed_images(
    pool: &DbPool,
    product_id: i64,
    paths: &[String],
    updated_at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let compressed = encode_list(paths)?;

    let result = sqlx::query(
        "UPDATE products SET compressed_product_images = ?, updated_at = ? WHERE product_id = ?",
    )
    .bind(&compressed)
    .bind(updated_at.to_rfc3339())
    .bind(product_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
