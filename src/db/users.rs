//! Utenti proprietari dei prodotti

use super::DbPool;

/// Crea un utente e ne restituisce l'ID
pub async fn insert_user(pool: &DbPool, name: &str) -> Result<i64, sqlx::Error> {
    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query("INSERT INTO users (name, created_at) VALUES (?, ?)")
        .bind(name)
        .bind(&now)
        .execute(pool)
        .await?;

    Ok(result.last_insert_rowid())
}

pub async fn user_exists(pool: &DbPool, user_id: i64) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}
