use std::time::Instant;

use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use log::{debug, info};

use crate::{database::{DatabaseError, ReadingStore}, schema::{self, readings}, sensor::Reading};

type DbPool = r2d2::Pool<r2d2::ConnectionManager<SqliteConnection>>;
type DbConnection = r2d2::PooledConnection<r2d2::ConnectionManager<SqliteConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout_ms: u32
}

impl r2d2::CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!("PRAGMA busy_timeout = {};", self.busy_timeout_ms))
            .map_err(r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct SqliteDatabase {
    pool: DbPool
}

impl SqliteDatabase {
    pub fn new(path: &str) -> Result<Self, DatabaseError> {
        let db_manager = r2d2::ConnectionManager::<SqliteConnection>::new(path);
        let db_pool = r2d2::Pool::builder()
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms: 1000 }))
            .build(db_manager)
            .map_err(|err| DatabaseError::Other(format!("Could not create database pool: {}", err)))?;

        info!("Database {} connected", path);
        {
            let mut pooled = db_pool.get().map_err(|_| DatabaseError::Busy)?;
            let conn: &mut SqliteConnection = &mut pooled;
            let applied = conn.run_pending_migrations(MIGRATIONS)
                .map_err(|err| DatabaseError::Other(format!("Migration failed: {}", err)))?;
            for version in applied {
                info!("Applied migration {}", version);
            }
        }

        Ok(SqliteDatabase {
            pool: db_pool
        })
    }

    fn connection_or_busy(&self) -> Result<DbConnection, DatabaseError> {
        self.pool.get()
            .map_err(|_| DatabaseError::Busy)
    }

    fn to_reading(dto: &schema::ReadingDTO) -> Reading {
        Reading {
            stream_id: dto.stream.clone(),
            value: dto.value,
            timestamp: DateTime::<Utc>::from_naive_utc_and_offset(dto.timestamp, Utc)
        }
    }

    fn map_readings(readings: Vec<schema::ReadingDTO>) -> Vec<Reading> {
        readings
            .iter()
            .map(Self::to_reading)
            .collect()
    }

    fn sql_error_to_db_error(err: diesel::result::Error) -> DatabaseError {
        match err {
            diesel::result::Error::NotFound => DatabaseError::NotFound,
            diesel::result::Error::AlreadyInTransaction => DatabaseError::Busy,
            diesel::result::Error::DatabaseError(_, _) => {
                let lowercase_err = err.to_string().to_lowercase();
                if lowercase_err.contains("database is locked") {
                    DatabaseError::Busy
                } else if lowercase_err.contains("unique") {
                    DatabaseError::Conflict
                } else {
                    DatabaseError::Other(format!("{:?}", err))
                }
            },
            err => DatabaseError::Other(err.to_string())
        }
    }
}

impl ReadingStore for SqliteDatabase {
    fn add_reading(&self, reading: &Reading) -> Result<(), DatabaseError> {
        let mut conn = self.connection_or_busy()?;
        let inserted = diesel::insert_into(readings::table)
            .values(schema::AddReadingDTO {
                stream: &reading.stream_id,
                timestamp: reading.timestamp.naive_utc(),
                value: reading.value
            })
            .execute(&mut conn)
            .map_err(Self::sql_error_to_db_error)?;

        match inserted {
            1 => Ok(()),
            n => Err(DatabaseError::Other(format!("Expected one inserted row, got {}", n)))
        }
    }

    fn latest(&self, stream: &str) -> Result<Option<Reading>, DatabaseError> {
        let mut conn = self.connection_or_busy()?;
        readings::table
            .filter(readings::stream.eq(stream))
            .order_by((readings::timestamp.desc(), readings::id.desc()))
            .first::<schema::ReadingDTO>(&mut conn)
            .optional()
            .map_err(Self::sql_error_to_db_error)
            .map(|reading| reading.as_ref().map(Self::to_reading))
    }

    fn within_window(&self, stream: &str, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Reading>, DatabaseError> {

        let before_db = Instant::now();

        let mut conn = self.connection_or_busy()?;
        let result = readings::table
            .filter(readings::stream.eq(stream))
            .filter(readings::timestamp.ge(start.naive_utc()))
            .filter(readings::timestamp.le(end.naive_utc()))
            .order_by((readings::timestamp.asc(), readings::id.asc()))
            .load::<schema::ReadingDTO>(&mut conn)
            .map_err(Self::sql_error_to_db_error);

        let diff = Instant::now().duration_since(before_db);
        debug!("Window query for {} took {}ms", stream, diff.as_millis());

        result.map(Self::map_readings)
    }

    fn most_recent(&self, stream: &str, until: DateTime<Utc>, limit: usize)
        -> Result<Vec<Reading>, DatabaseError> {

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut conn = self.connection_or_busy()?;
        readings::table
            .filter(readings::stream.eq(stream))
            .filter(readings::timestamp.le(until.naive_utc()))
            .order_by((readings::timestamp.desc(), readings::id.desc()))
            .limit(limit)
            .load::<schema::ReadingDTO>(&mut conn)
            .map_err(Self::sql_error_to_db_error)
            .map(Self::map_readings)
    }

    fn count_readings(&self, stream: &str) -> Result<i64, DatabaseError> {
        let mut conn = self.connection_or_busy()?;
        readings::table
            .filter(readings::stream.eq(stream))
            .count()
            .get_result::<i64>(&mut conn)
            .map_err(Self::sql_error_to_db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn open() -> (tempfile::TempDir, SqliteDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.sqlite3");
        let db = SqliteDatabase::new(path.to_str().unwrap()).unwrap();
        (dir, db)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn latest_is_none_for_silent_stream() {
        let (_dir, db) = open();
        assert_eq!(db.latest("temperature").unwrap(), None);
        assert_eq!(db.count_readings("temperature").unwrap(), 0);
    }

    #[test]
    fn latest_picks_newest_timestamp_not_newest_row() {
        let (_dir, db) = open();
        db.add_reading(&Reading::new("temperature", 21.5, at(10))).unwrap();
        db.add_reading(&Reading::new("temperature", 19.0, at(-30))).unwrap();
        db.add_reading(&Reading::new("humidity", 55.0, at(20))).unwrap();

        let latest = db.latest("temperature").unwrap().unwrap();
        assert_eq!(latest.value, 21.5);
        assert_eq!(latest.timestamp, at(10));
        assert_eq!(db.count_readings("temperature").unwrap(), 2);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let (_dir, db) = open();
        for (secs, value) in [(-120, 1.0), (-60, 2.0), (-30, 3.0), (0, 4.0), (30, 5.0)] {
            db.add_reading(&Reading::new("soil_moisture", value, at(secs))).unwrap();
        }

        let values: Vec<f64> = db.within_window("soil_moisture", at(-60), at(0))
            .unwrap()
            .iter()
            .map(|reading| reading.value)
            .collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn most_recent_is_newest_first_and_limited() {
        let (_dir, db) = open();
        for i in 0..10 {
            db.add_reading(&Reading::new("humidity", i as f64, at(i))).unwrap();
        }

        let values: Vec<f64> = db.most_recent("humidity", at(100), 3)
            .unwrap()
            .iter()
            .map(|reading| reading.value)
            .collect();
        assert_eq!(values, vec![9.0, 8.0, 7.0]);
    }

    #[test]
    fn most_recent_skips_rows_after_until() {
        let (_dir, db) = open();
        for i in 0..10 {
            db.add_reading(&Reading::new("humidity", i as f64, at(i))).unwrap();
        }

        let values: Vec<f64> = db.most_recent("humidity", at(5), 3)
            .unwrap()
            .iter()
            .map(|reading| reading.value)
            .collect();
        assert_eq!(values, vec![5.0, 4.0, 3.0]);
    }

    #[test]
    fn subsecond_timestamps_survive_storage() {
        let (_dir, db) = open();
        let ts = at(5) + Duration::milliseconds(250);
        db.add_reading(&Reading::new("temperature", 20.25, ts)).unwrap();

        assert_eq!(db.latest("temperature").unwrap().unwrap().timestamp, ts);
    }
}
