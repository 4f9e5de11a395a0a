//! 扫描历史数据访问层

use rusqlite::{params, Row};

use crate::models::{ScanOutcome, ScanResult};
use crate::utils::error::{AppError, AppResult};

use super::connection::Database;

fn outcome_to_str(outcome: ScanOutcome) -> &'static str {
    match outcome {
        ScanOutcome::Completed => "completed",
        ScanOutcome::Cancelled => "cancelled",
        ScanOutcome::Aborted => "aborted",
    }
}

fn outcome_from_str(s: &str) -> ScanOutcome {
    match s {
        "completed" => ScanOutcome::Completed,
        "cancelled" => ScanOutcome::Cancelled,
        _ => ScanOutcome::Aborted,
    }
}

fn json_error(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_scan_result(row: &Row<'_>) -> rusqlite::Result<ScanResult> {
    let outcome: String = row.get("outcome")?;
    let counts_json: String = row.get("counts_json")?;
    let failures_json: String = row.get("failures_json")?;
    Ok(ScanResult {
        scan_id: row.get("scan_id")?,
        root_id: row.get("root_id")?,
        root_path: row.get("root_path")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        outcome: outcome_from_str(&outcome),
        abort_reason: row.get("abort_reason")?,
        counts: serde_json::from_str(&counts_json).map_err(json_error)?,
        failures: serde_json::from_str(&failures_json).map_err(json_error)?,
    })
}

impl Database {
    /// 保存扫描结果，并只保留最近 `keep` 条
    pub fn record_scan_result(&self, result: &ScanResult, keep: usize) -> AppResult<()> {
        let counts_json = serde_json::to_string(&result.counts)
            .map_err(|e| AppError::General(format!("failed to encode scan counts: {}", e)))?;
        let failures_json = serde_json::to_string(&result.failures)
            .map_err(|e| AppError::General(format!("failed to encode scan failures: {}", e)))?;

        self.transaction(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO scan_history
                    (scan_id, root_id, root_path, started_at, finished_at, outcome, abort_reason, counts_json, failures_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    result.scan_id,
                    result.root_id,
                    result.root_path,
                    result.started_at,
                    result.finished_at,
                    outcome_to_str(result.outcome),
                    result.abort_reason,
                    counts_json,
                    failures_json,
                ],
            )?;

            conn.execute(
                "DELETE FROM scan_history WHERE root_id = ?1 AND scan_id NOT IN (
                    SELECT scan_id FROM scan_history WHERE root_id = ?1
                    ORDER BY finished_at DESC, rowid DESC LIMIT ?2
                )",
                params![result.root_id, keep.max(1) as i64],
            )?;
            Ok(())
        })
    }

    /// 最近的扫描结果，按结束时间倒序
    pub fn scan_history(&self, root_id: i64, limit: usize) -> AppResult<Vec<ScanResult>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM scan_history WHERE root_id = ?1
             ORDER BY finished_at DESC, rowid DESC LIMIT ?2",
        )?;
        let results = stmt
            .query_map(params![root_id, limit as i64], row_to_scan_result)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(results)
    }

    pub fn latest_scan_result(&self, root_id: i64) -> AppResult<Option<ScanResult>> {
        Ok(self.scan_history(root_id, 1)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanCounts;

    fn result(root_id: i64, n: usize) -> ScanResult {
        ScanResult {
            scan_id: format!("scan-{}", n),
            root_id,
            root_path: "/photos".into(),
            started_at: format!("2024-01-01T00:00:{:02}Z", n),
            finished_at: format!("2024-01-01T00:00:{:02}Z", n),
            outcome: ScanOutcome::Completed,
            abort_reason: None,
            counts: ScanCounts {
                media_created: n,
                ..Default::default()
            },
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let root = db.create_root("alice", "/photos").unwrap();

        for n in 0..5 {
            db.record_scan_result(&result(root.root_id, n), 3).unwrap();
        }

        let history = db.scan_history(root.root_id, 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].scan_id, "scan-4");
        assert_eq!(history[0].counts.media_created, 4);
        assert_eq!(
            db.latest_scan_result(root.root_id).unwrap().unwrap().scan_id,
            "scan-4"
        );
    }
}
