//! Persisted embedding cache
//!
//! Entries are keyed by a hash of the model and text content and written at
//! most once per key (`ON CONFLICT DO NOTHING`), so readers never observe a
//! partially replaced vector.

use kgc_common::db::{decode_vector, encode_vector};
use kgc_common::Result;
use sqlx::SqliteConnection;

/// Load a cached vector
pub async fn load_embedding(conn: &mut SqliteConnection, text_key: &str) -> Result<Option<Vec<f32>>> {
    let bytes: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT vector FROM embedding_cache WHERE text_key = ?")
            .bind(text_key)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(bytes.and_then(|b| decode_vector(&b)))
}

/// Store a vector unless the key already exists
pub async fn store_embedding(
    conn: &mut SqliteConnection,
    text_key: &str,
    model: &str,
    vector: &[f32],
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO embedding_cache (text_key, model, vector)
        VALUES (?, ?, ?)
        ON CONFLICT(text_key) DO NOTHING
        "#,
    )
    .bind(text_key)
    .bind(model)
    .bind(encode_vector(vector))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Number of persisted entries
pub async fn count_embeddings(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
