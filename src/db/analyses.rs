use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::types::{
    epoch_watermark, format_timestamp, parse_timestamp, Analysis, AnalysisEligibility,
    ParsedAnalysis,
};

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<(Analysis, String)> {
    Ok((
        Analysis {
            id: row.get(0)?,
            user_id: row.get(1)?,
            summary: row.get(2)?,
            content: row.get(3)?,
            bullet_points: Vec::new(),
            is_favorited: row.get::<_, i64>(5)? != 0,
            created_at: row.get(6)?,
        },
        row.get(4)?,
    ))
}

fn decode_bullets(mut analysis: Analysis, raw: &str) -> Result<Analysis, DbError> {
    analysis.bullet_points = serde_json::from_str(raw)?;
    Ok(analysis)
}

/// Watermark written on commit: one microsecond past the newest consumed
/// entry. Entries written while the analysis was generating stay at or above
/// it. Never moves backwards.
pub(crate) fn next_watermark(
    previous: Option<DateTime<Utc>>,
    newest_entry: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let advanced = newest_entry.map(|newest| newest + Duration::microseconds(1));
    previous.max(advanced)
}

impl JournalDb {
    // =========================================================================
    // Analysis commit
    // =========================================================================

    /// Write an analysis, its entry links and the user's new watermark as one
    /// transaction. Any failure rolls all three back.
    ///
    /// Every entry id must belong to `user_id`; an entry already linked to an
    /// earlier analysis fails the UNIQUE constraint on `analysis_entries`.
    pub fn create_analysis(
        &self,
        user_id: &str,
        parsed: &ParsedAnalysis,
        entry_ids: &[String],
        committed_at: DateTime<Utc>,
    ) -> Result<CommittedAnalysis, DbError> {
        let bullets_json = serde_json::to_string(&parsed.bullet_points)?;
        let analysis_id = uuid::Uuid::new_v4().to_string();
        let created_at = format_timestamp(committed_at);

        self.with_transaction(|tx| {
            tx.conn.execute(
                "INSERT INTO analyses (id, user_id, summary, content, bullet_points, is_favorited, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![
                    analysis_id,
                    user_id,
                    parsed.summary,
                    parsed.content,
                    bullets_json,
                    created_at,
                ],
            )?;

            let mut newest_entry: Option<DateTime<Utc>> = None;
            for entry_id in entry_ids {
                let inserted = tx.conn.execute(
                    "INSERT INTO analysis_entries (analysis_id, entry_id)
                     SELECT ?1, id FROM journal_entries WHERE id = ?2 AND user_id = ?3",
                    params![analysis_id, entry_id, user_id],
                )?;
                if inserted != 1 {
                    return Err(DbError::InvalidRow {
                        table: "analysis_entries",
                        reason: format!("entry {} does not belong to user {}", entry_id, user_id),
                    });
                }

                let entry_ts: String = tx.conn.query_row(
                    "SELECT created_at FROM journal_entries WHERE id = ?1",
                    params![entry_id],
                    |row| row.get(0),
                )?;
                if let Some(ts) = parse_timestamp(&entry_ts) {
                    newest_entry = Some(newest_entry.map_or(ts, |cur| cur.max(ts)));
                }
            }

            let previous: Option<String> = tx
                .conn
                .query_row(
                    "SELECT last_analysis_date FROM users WHERE id = ?1",
                    params![user_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten();
            let previous = previous.as_deref().and_then(parse_timestamp);
            let watermark = next_watermark(previous, newest_entry).map(format_timestamp);
            let updated = tx.conn.execute(
                "UPDATE users SET last_analysis_date = ?1 WHERE id = ?2",
                params![watermark, user_id],
            )?;
            if updated != 1 {
                return Err(DbError::InvalidRow {
                    table: "users",
                    reason: format!("user {} not found while advancing watermark", user_id),
                });
            }

            Ok(CommittedAnalysis {
                analysis: Analysis {
                    id: analysis_id.clone(),
                    user_id: user_id.to_string(),
                    summary: parsed.summary.clone(),
                    content: parsed.content.clone(),
                    bullet_points: parsed.bullet_points.clone(),
                    is_favorited: false,
                    created_at: created_at.clone(),
                },
                watermark,
            })
        })
    }

    // =========================================================================
    // Eligibility
    // =========================================================================

    /// Eligibility for `user_id`, or `None` if the user does not exist.
    pub fn get_analysis_eligibility(
        &self,
        user_id: &str,
        required_count: usize,
    ) -> Result<Option<AnalysisEligibility>, DbError> {
        let Some(user) = self.get_user(user_id)? else {
            return Ok(None);
        };
        let watermark = user.last_analysis_date.unwrap_or_else(epoch_watermark);
        let count = self.count_unanalyzed_entries(user_id, &watermark)?;
        Ok(Some(AnalysisEligibility::new(count, required_count)))
    }

    // =========================================================================
    // Analysis reads
    // =========================================================================

    /// Creation time of the user's most recent analysis.
    pub fn latest_analysis_at(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, DbError> {
        let latest: Option<String> = self.conn.query_row(
            "SELECT MAX(created_at) FROM analyses WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(latest.as_deref().and_then(parse_timestamp))
    }

    pub fn get_analysis(&self, analysis_id: &str) -> Result<Option<Analysis>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, user_id, summary, content, bullet_points, is_favorited, created_at
                 FROM analyses WHERE id = ?1",
                params![analysis_id],
                analysis_from_row,
            )
            .optional()?;
        row.map(|(analysis, bullets)| decode_bullets(analysis, &bullets))
            .transpose()
    }

    /// Most recent analyses for a user, newest first.
    pub fn get_analyses_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Analysis>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, summary, content, bullet_points, is_favorited, created_at
             FROM analyses WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], analysis_from_row)?;
        let mut analyses = Vec::new();
        for row in rows {
            let (analysis, bullets) = row?;
            analyses.push(decode_bullets(analysis, &bullets)?);
        }
        Ok(analyses)
    }

    /// Ids of the entries an analysis consumed, oldest entry first.
    pub fn get_analysis_entry_ids(&self, analysis_id: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT ae.entry_id
             FROM analysis_entries ae
             JOIN journal_entries je ON je.id = ae.entry_id
             WHERE ae.analysis_id = ?1
             ORDER BY je.created_at ASC, je.id ASC",
        )?;
        let rows = stmt.query_map(params![analysis_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Set the favorite flag. Returns false if the analysis does not exist.
    pub fn set_analysis_favorited(&self, analysis_id: &str, favorited: bool) -> Result<bool, DbError> {
        let updated = self.conn.execute(
            "UPDATE analyses SET is_favorited = ?1 WHERE id = ?2",
            params![favorited as i64, analysis_id],
        )?;
        Ok(updated == 1)
    }
}
