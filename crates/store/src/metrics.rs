// SPDX-License-Identifier: MIT

//! Metrics time-series store (C4, §4.4): a relational `(category, name, ts)`
//! table with last-write-wins upsert, plus periodic rollup into companion
//! resolutions — the option spec.md §4.4 explicitly offers over a native
//! time-series engine.

use crate::error::StoreError;
use crate::Store;
use rusqlite::params;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    OneMinute,
    FiveMinute,
    OneHour,
}

impl Resolution {
    fn as_str(&self) -> &'static str {
        match self {
            Resolution::OneMinute => "1m",
            Resolution::FiveMinute => "5m",
            Resolution::OneHour => "1h",
        }
    }

    /// Bucket width in seconds.
    fn bucket_secs(&self) -> i64 {
        match self {
            Resolution::OneMinute => 60,
            Resolution::FiveMinute => 300,
            Resolution::OneHour => 3600,
        }
    }

    /// Retention window in seconds (§3 downsampling rules).
    fn retention_secs(&self) -> i64 {
        match self {
            Resolution::OneMinute => 3600,
            Resolution::FiveMinute => 86_400,
            Resolution::OneHour => 604_800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub ts: i64,
    pub value: f64,
}

impl Store {
    /// Records a raw sample. Duplicate `(category, name, ts)` overwrites
    /// the previous value (§3/§4.4 "keep last").
    pub fn metrics_add(&self, category: &str, name: &str, ts: i64, value: f64) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO metrics_points (category, name, ts, value) VALUES (?1,?2,?3,?4)
             ON CONFLICT(category, name, ts) DO UPDATE SET value = ?4",
            params![category, name, ts, value],
        )?;
        Ok(())
    }

    pub fn metrics_range(
        &self,
        category: &str,
        name: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<MetricPoint>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ts, value FROM metrics_points
             WHERE category = ?1 AND name = ?2 AND ts >= ?3 AND ts <= ?4
             ORDER BY ts ASC",
        )?;
        let rows = stmt
            .query_map(params![category, name, from, to], |r| {
                Ok(MetricPoint {
                    ts: r.get(0)?,
                    value: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn metrics_range_rollup(
        &self,
        resolution: Resolution,
        category: &str,
        name: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<MetricPoint>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT bucket_ts, value FROM metrics_rollup
             WHERE resolution = ?1 AND category = ?2 AND name = ?3
             AND bucket_ts >= ?4 AND bucket_ts <= ?5
             ORDER BY bucket_ts ASC",
        )?;
        let rows = stmt
            .query_map(
                params![resolution.as_str(), category, name, from, to],
                |r| {
                    Ok(MetricPoint {
                        ts: r.get(0)?,
                        value: r.get(1)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Returns the latest point for each `(category, name)` whose name
    /// matches `pattern` (SQL `LIKE` syntax).
    pub fn metrics_latest(&self, pattern: &str) -> Result<Vec<(String, String, MetricPoint)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT category, name, ts, value FROM metrics_points mp
             WHERE name LIKE ?1 AND ts = (
                SELECT MAX(ts) FROM metrics_points WHERE category = mp.category AND name = mp.name
             )",
        )?;
        let rows = stmt
            .query_map(params![pattern], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    MetricPoint {
                        ts: r.get(2)?,
                        value: r.get(3)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Materializes one resolution's rollup buckets over raw points newer
    /// than `since`, averaging samples within each bucket. Run periodically
    /// by the control plane; not on the hot insert path.
    pub fn metrics_rollup_pass(&self, resolution: Resolution, since: i64) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let bucket = resolution.bucket_secs();
        let sql = format!(
            "INSERT INTO metrics_rollup (resolution, category, name, bucket_ts, value)
             SELECT '{res}', category, name, (ts / {bucket}) * {bucket} AS bucket_ts, AVG(value)
             FROM metrics_points WHERE ts >= ?1
             GROUP BY category, name, bucket_ts
             ON CONFLICT(resolution, category, name, bucket_ts) DO UPDATE SET value = excluded.value",
            res = resolution.as_str(),
        );
        let n = conn.execute(&sql, params![since])?;

        let cutoff = since - resolution.retention_secs();
        conn.execute(
            "DELETE FROM metrics_rollup WHERE resolution = ?1 AND bucket_ts < ?2",
            params![resolution.as_str(), cutoff],
        )?;
        Ok(n)
    }
}
