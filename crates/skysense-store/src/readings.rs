//! CRUD and aggregation over the `data_sensor` table.

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::Result;
use crate::models::{DailyAggregate, NewReading, Page, ReadingFilter, StoredReading};

const READING_COLUMNS: &str =
    "id, wind_speed, temperature, wind_degree, humidity, ldr, rain_rate, timestamp";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Append a reading, timestamped now. Returns the new row id.
    pub fn insert_reading(&self, reading: &NewReading) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO data_sensor
                (wind_speed, temperature, wind_degree, humidity, ldr, rain_rate, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                reading.wind_speed,
                reading.temperature,
                reading.wind_direction,
                reading.humidity,
                reading.light,
                reading.rain_rate,
                encode_ts(&Utc::now()),
            ],
        )?;

        let id = self.conn().last_insert_rowid();
        tracing::debug!(id, "reading inserted");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Per-day avg/max/min of the main measurements, newest day first.
    pub fn daily_aggregates(&self) -> Result<Vec<DailyAggregate>> {
        let mut stmt = self.conn().prepare(
            "SELECT
                date(timestamp) AS day,
                AVG(wind_speed),  MAX(wind_speed),  MIN(wind_speed),
                AVG(temperature), MAX(temperature), MIN(temperature),
                AVG(humidity),    MAX(humidity),    MIN(humidity),
                AVG(ldr),         MAX(ldr),         MIN(ldr)
             FROM data_sensor
             GROUP BY date(timestamp)
             ORDER BY day DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(DailyAggregate {
                day: row.get(0)?,
                avg_wind_speed: row.get(1)?,
                max_wind_speed: row.get(2)?,
                min_wind_speed: row.get(3)?,
                avg_temperature: row.get(4)?,
                max_temperature: row.get(5)?,
                min_temperature: row.get(6)?,
                avg_humidity: row.get(7)?,
                max_humidity: row.get(8)?,
                min_humidity: row.get(9)?,
                avg_light: row.get(10)?,
                max_light: row.get(11)?,
                min_light: row.get(12)?,
            })
        })?;

        let mut aggregates = Vec::new();
        for row in rows {
            aggregates.push(row?);
        }
        Ok(aggregates)
    }

    /// One page of readings inside `filter`, newest first.
    pub fn list_readings(&self, filter: &ReadingFilter, page: Page) -> Result<Vec<StoredReading>> {
        let (where_sql, mut values) = filter_clause(filter);
        values.push(Value::Integer(i64::from(page.limit)));
        values.push(Value::Integer(i64::from(page.offset)));

        let sql = format!(
            "SELECT {READING_COLUMNS} FROM data_sensor{where_sql}
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
        );
        self.query_readings(&sql, values)
    }

    /// Number of readings inside `filter`.
    pub fn count_readings(&self, filter: &ReadingFilter) -> Result<u64> {
        let (where_sql, values) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM data_sensor{where_sql}");

        let total: i64 = self
            .conn()
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(total.max(0) as u64)
    }

    /// Every reading inside `filter`, newest first, for CSV export.
    pub fn export_readings(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>> {
        let (where_sql, values) = filter_clause(filter);
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM data_sensor{where_sql}
             ORDER BY timestamp DESC, id DESC"
        );
        self.query_readings(&sql, values)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a reading by id.  Returns `true` if a row was deleted.
    pub fn delete_reading(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM data_sensor WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn query_readings(&self, sql: &str, values: Vec<Value>) -> Result<Vec<StoredReading>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_reading)?;

        let mut readings = Vec::new();
        for row in rows {
            readings.push(row?);
        }
        Ok(readings)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn filter_clause(filter: &ReadingFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(from) = filter.from {
        clauses.push("timestamp >= ?");
        values.push(Value::Text(encode_ts(&from)));
    }
    if let Some(to) = filter.to {
        clauses.push("timestamp <= ?");
        values.push(Value::Text(encode_ts(&to)));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

/// Map a `rusqlite::Row` to a [`StoredReading`].
fn row_to_reading(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredReading> {
    let ts_str: String = row.get(7)?;

    Ok(StoredReading {
        id: row.get(0)?,
        wind_speed: row.get(1)?,
        temperature: row.get(2)?,
        wind_direction: row.get(3)?,
        humidity: row.get(4)?,
        light: row.get(5)?,
        rain_rate: row.get(6)?,
        created_at: decode_ts(7, &ts_str)?,
    })
}
