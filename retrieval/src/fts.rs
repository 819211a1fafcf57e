use serde::Deserialize;
use tracing::debug;

use common::{error::AppError, storage::db::SurrealDbClient};

use crate::scoring::{deserialize_flexible_id, RankedHit};

#[derive(Debug, Deserialize)]
struct FtsScoreRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    fts_score: f32,
}

/// Lexical retriever. Scores `title`,
/// `description`, and `subjects` with BM25 via the three `resource_fts_*`
/// indexes and sums the per-field scores.
///
/// `allowed_ids`, when set, restricts results to that id set (the filtered
/// candidate universe computed up front when the request carries filters).
pub async fn search_lexical(
    db: &SurrealDbClient,
    query: &str,
    take: usize,
    allowed_ids: Option<&[String]>,
) -> Result<Vec<RankedHit>, AppError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let filter_clause = if allowed_ids.is_some() {
        "(title @0@ $terms OR description @1@ $terms OR subjects @2@ $terms) AND id IN $allowed"
    } else {
        "(title @0@ $terms OR description @1@ $terms OR subjects @2@ $terms)"
    };

    let sql = format!(
        "SELECT id, \
         (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) + \
         (IF search::score(1) != NONE THEN search::score(1) ELSE 0 END) + \
         (IF search::score(2) != NONE THEN search::score(2) ELSE 0 END) AS fts_score \
         FROM resource \
         WHERE {filter_clause} \
         ORDER BY fts_score DESC \
         LIMIT $limit",
    );

    debug!(limit = take, "executing lexical search");

    let mut request = db.query(sql).bind(("terms", query.to_owned())).bind(("limit", take as i64));
    if let Some(ids) = allowed_ids {
        request = request.bind(("allowed", ids.to_vec()));
    }

    let rows: Vec<FtsScoreRow> = request.await?.take(0)?;

    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| RankedHit {
            resource_id: row.id,
            rank: u32::try_from(i + 1).unwrap_or(u32::MAX),
            raw_score: row.fts_score,
        })
        .collect())
}
