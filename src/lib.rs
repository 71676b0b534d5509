pub mod api;
pub mod config;
pub mod database;
pub mod liveness;
pub mod report;
pub mod schema;
pub mod sensor;
pub mod sqlite_database;
pub mod window;

#[cfg(test)]
pub mod test_support;
