use crate::core::content::{
    AutoReplySettings, ContentRecord, ContentStore, DailyCommentStats, NewContent, StoreError,
};
use crate::core::moderation::{
    ContentId, ContentKind, ContentVersion, Disposition, DispositionRecord, DispositionSink,
    SinkError,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

const COLUMNS: &str = "id, kind, author_id, parent_post_id, reply_to_id, title, body, revision, \
    disposition, decision_seq, block_reason, needs_manual_review, auto_reply_enabled, \
    auto_reply_delay_secs, created_at, updated_at";

pub struct SqliteContentStore {
    pool: Pool<Sqlite>,
}

impl SqliteContentStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                author_id INTEGER NOT NULL,
                parent_post_id INTEGER,
                reply_to_id INTEGER,
                title TEXT,
                body TEXT NOT NULL,
                revision INTEGER NOT NULL DEFAULT 1,
                disposition TEXT NOT NULL DEFAULT 'pending_review',
                decision_seq INTEGER NOT NULL DEFAULT 0,
                block_reason TEXT,
                needs_manual_review BOOLEAN NOT NULL DEFAULT 0,
                auto_reply_enabled BOOLEAN NOT NULL DEFAULT 0,
                auto_reply_delay_secs INTEGER NOT NULL DEFAULT 0,
                deleted BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_content_pending ON content (disposition, updated_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_kind_created ON content (kind, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn version_row(&self, content_id: ContentId) -> Result<Option<VersionRow>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT revision, decision_seq, disposition, deleted FROM content WHERE id = ?",
        )
        .bind(content_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| VersionRow {
            revision: row.get::<i64, _>("revision") as u32,
            decision_seq: row.get::<i64, _>("decision_seq") as u64,
            disposition: row.get("disposition"),
            deleted: row.get::<bool, _>("deleted"),
        }))
    }
}

struct VersionRow {
    revision: u32,
    decision_seq: u64,
    disposition: String,
    deleted: bool,
}

/// Fixed-width UTC timestamps so that text comparison matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: ContentId, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id,
            reason: format!("bad timestamp '{}': {}", raw, e),
        })
}

fn storage(e: sqlx::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn row_to_record(row: &SqliteRow) -> Result<ContentRecord, StoreError> {
    let id = row.get::<i64, _>("id") as ContentId;
    let corrupt = |reason: String| StoreError::Corrupt { id, reason };

    let kind: ContentKind = row
        .get::<String, _>("kind")
        .parse()
        .map_err(|e| corrupt(format!("{}", e)))?;
    let disposition: Disposition = row
        .get::<String, _>("disposition")
        .parse()
        .map_err(|e| corrupt(format!("{}", e)))?;

    Ok(ContentRecord {
        id,
        kind,
        author_id: row.get::<i64, _>("author_id") as u64,
        parent_post_id: row.get::<Option<i64>, _>("parent_post_id").map(|v| v as ContentId),
        reply_to_id: row.get::<Option<i64>, _>("reply_to_id").map(|v| v as ContentId),
        title: row.get("title"),
        body: row.get("body"),
        revision: row.get::<i64, _>("revision") as u32,
        disposition,
        decision_seq: row.get::<i64, _>("decision_seq") as u64,
        block_reason: row.get("block_reason"),
        needs_manual_review: row.get("needs_manual_review"),
        auto_reply: AutoReplySettings {
            enabled: row.get("auto_reply_enabled"),
            delay_secs: row.get::<i64, _>("auto_reply_delay_secs") as u64,
        },
        created_at: parse_timestamp(id, &row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(id, &row.get::<String, _>("updated_at"))?,
    })
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn create(&self, content: NewContent) -> Result<ContentRecord, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO content (kind, author_id, parent_post_id, reply_to_id, title, body,
                auto_reply_enabled, auto_reply_delay_secs, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(content.kind.as_str())
        .bind(content.author_id as i64)
        .bind(content.parent_post_id.map(|v| v as i64))
        .bind(content.reply_to_id.map(|v| v as i64))
        .bind(&content.title)
        .bind(&content.body)
        .bind(content.auto_reply.enabled)
        .bind(content.auto_reply.delay_secs as i64)
        .bind(timestamp(now))
        .bind(timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        let id = result.last_insert_rowid() as ContentId;
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::Storage(format!("content {} vanished after insert", id)))
    }

    async fn get(&self, id: ContentId) -> Result<Option<ContentRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content WHERE id = ? AND deleted = 0",
            COLUMNS
        ))
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn update_text(
        &self,
        id: ContentId,
        title: Option<String>,
        body: String,
    ) -> Result<Option<ContentRecord>, StoreError> {
        // Comments have no title; keep whatever is stored (NULL).
        let result = sqlx::query(
            r#"
            UPDATE content SET
                title = CASE WHEN kind = 'post' THEN ? ELSE title END,
                body = ?,
                revision = revision + 1,
                disposition = 'pending_review',
                block_reason = NULL,
                needs_manual_review = 0,
                updated_at = ?
            WHERE id = ? AND deleted = 0
            "#,
        )
        .bind(&title)
        .bind(&body)
        .bind(timestamp(Utc::now()))
        .bind(id as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn delete(&self, id: ContentId) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE content SET deleted = 1, updated_at = ? WHERE id = ? AND deleted = 0")
                .bind(timestamp(Utc::now()))
                .bind(id as i64)
                .execute(&self.pool)
                .await
                .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn pending_ids(
        &self,
        updated_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ContentId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM content
            WHERE disposition = 'pending_review' AND needs_manual_review = 0
                AND deleted = 0 AND updated_at < ?
            ORDER BY updated_at ASC
            LIMIT ?
            "#,
        )
        .bind(timestamp(updated_before))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("id") as ContentId)
            .collect())
    }

    async fn comment_counts(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyCommentStats>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT substr(created_at, 1, 10) AS day,
                COUNT(*) AS total,
                SUM(CASE WHEN disposition = 'hidden' THEN 1 ELSE 0 END) AS hidden
            FROM content
            WHERE kind = 'comment' AND deleted = 0
                AND substr(created_at, 1, 10) BETWEEN ? AND ?
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(from.format("%Y-%m-%d").to_string())
        .bind(to.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                let day: String = row.get("day");
                let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|e| StoreError::Storage(format!("bad day '{}': {}", day, e)))?;
                Ok(DailyCommentStats {
                    date,
                    total_comments: row.get::<i64, _>("total") as u64,
                    hidden_comments: row.get::<i64, _>("hidden") as u64,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DispositionSink for SqliteContentStore {
    async fn set_disposition(
        &self,
        content_id: ContentId,
        record: DispositionRecord,
    ) -> Result<(), SinkError> {
        let unavailable = |e: sqlx::Error| SinkError::Unavailable(e.to_string());

        let result = sqlx::query(
            r#"
            UPDATE content SET
                disposition = ?,
                decision_seq = ?,
                block_reason = ?,
                needs_manual_review = ?,
                updated_at = ?
            WHERE id = ? AND deleted = 0 AND revision = ? AND decision_seq < ?
            "#,
        )
        .bind(record.disposition.as_str())
        .bind(record.sequence_no as i64)
        .bind(&record.reason)
        .bind(record.needs_manual_review)
        .bind(timestamp(Utc::now()))
        .bind(content_id as i64)
        .bind(record.revision as i64)
        .bind(record.sequence_no as i64)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing matched; work out which condition failed.
        match self.version_row(content_id).await.map_err(unavailable)? {
            None => Err(SinkError::NotFound(content_id)),
            Some(row) if row.deleted => Err(SinkError::NotFound(content_id)),
            Some(row) if row.revision != record.revision => Err(SinkError::Superseded {
                content_id,
                attempted: record.revision,
                current: row.revision,
            }),
            Some(row) => {
                let stored = row.disposition.parse::<Disposition>().map_err(|_| {
                    SinkError::Unavailable(format!(
                        "content {} has unknown disposition {:?}",
                        content_id, row.disposition
                    ))
                })?;
                Err(SinkError::Conflict {
                    content_id,
                    attempted: record.sequence_no,
                    current: row.decision_seq,
                    stored,
                })
            }
        }
    }

    async fn content_version(
        &self,
        content_id: ContentId,
    ) -> Result<Option<ContentVersion>, SinkError> {
        let row = self
            .version_row(content_id)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        Ok(row.map(|row| ContentVersion {
            revision: row.revision,
            deleted: row.deleted,
        }))
    }
}
