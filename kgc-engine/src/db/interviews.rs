//! Interview registry

use super::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use kgc_common::db::InterviewRecord;
use kgc_common::Result;
use sqlx::{Row, SqliteConnection};

/// Register an interview; returns false if it was already registered.
///
/// Always writes (a re-registration refreshes `consolidated_at`), so calling
/// this first inside a transaction takes the database write lock up front.
pub async fn register(
    conn: &mut SqliteConnection,
    interview_id: &str,
    interview_date: Option<DateTime<Utc>>,
) -> Result<bool> {
    let now = format_timestamp(&Utc::now());

    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO interviews (interview_id, interview_date, consolidated_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(interview_id)
    .bind(interview_date.as_ref().map(format_timestamp))
    .bind(&now)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;

    if !inserted {
        sqlx::query("UPDATE interviews SET consolidated_at = ? WHERE interview_id = ?")
            .bind(&now)
            .bind(interview_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(inserted)
}

pub async fn set_entity_count(conn: &mut SqliteConnection, interview_id: &str, count: i64) -> Result<()> {
    sqlx::query("UPDATE interviews SET entity_count = ? WHERE interview_id = ?")
        .bind(count)
        .bind(interview_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Number of interviews in the corpus
pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM interviews")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub async fn fetch_all(conn: &mut SqliteConnection) -> Result<Vec<InterviewRecord>> {
    let rows = sqlx::query(
        "SELECT interview_id, interview_date, consolidated_at, entity_count FROM interviews ORDER BY rowid",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| InterviewRecord {
            interview_id: row.get("interview_id"),
            interview_date: parse_timestamp(row.get("interview_date")),
            consolidated_at: parse_timestamp(Some(row.get("consolidated_at"))).unwrap_or_default(),
            entity_count: row.get("entity_count"),
        })
        .collect())
}
