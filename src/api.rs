use actix_web::{get, web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::{
    database::{DatabaseError, ReadingStore},
    report::{self, ReportSettings, StatusRequest},
    sensor::{find_stream, Reading, StreamDescriptor},
    window,
};

/// Read-only state shared by every handler.
pub struct ApiContext {
    pub streams: Vec<StreamDescriptor>,
    pub settings: ReportSettings,
}

fn map_database_error_to_http(err: DatabaseError) -> HttpResponse {
    match err {
        DatabaseError::Busy => HttpResponse::ServiceUnavailable().body("Database connection failed"),
        DatabaseError::NotFound => HttpResponse::NotFound().body("{}"),
        DatabaseError::Conflict => HttpResponse::Conflict().body("Conflicting write"),
        DatabaseError::Other(msg) => {
            error!("Database error: {}", msg);
            HttpResponse::InternalServerError().body(msg)
        }
    }
}

fn map_db_call_to_http_response<R: serde::Serialize>(db_result: Result<R, DatabaseError>) -> HttpResponse {
    match db_result {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(err) => map_database_error_to_http(err)
    }
}

fn blocking_failed(err: actix_web::error::BlockingError) -> HttpResponse {
    error!("Blocking task failed: {}", err);
    HttpResponse::InternalServerError().body("Worker failed")
}

fn unknown_stream(id: &str) -> HttpResponse {
    HttpResponse::NotFound().body(format!("Unknown stream {}", id))
}

/// Query values that do not parse as integers count as not supplied.
fn lenient_int(name: &str, raw: &Option<String>) -> Option<i64> {
    let raw = raw.as_ref()?;
    match raw.trim().parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!("Ignoring non-numeric {}={:?}", name, raw);
            None
        }
    }
}

pub fn configure<D: ReadingStore + Send + Sync + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(status)
        .service(web::scope("/api")
            .service(web::resource("/device/status")
                .route(web::get().to(device_status::<D>))
            )
            .service(web::resource("/streams")
                .route(web::get().to(streams_list))
            )
            .service(web::resource("/streams/{id}/latest")
                .route(web::get().to(stream_latest_reading::<D>))
            )
            .service(web::resource("/streams/{id}/readings")
                .route(web::get().to(stream_readings::<D>))
                .route(web::post().to(add_reading::<D>))
            )
            .default_service(web::route().to(|| async { HttpResponse::NotFound().finish() }))
        );
}

#[get("/status")]
pub async fn status() -> impl Responder {
    HttpResponse::Ok().body("Server is up and running!")
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().body("<html><head><title>Not found</title><body><h1>404</h1></html>")
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    threshold: Option<String>,
    hours: Option<String>,
    limit: Option<String>,
}

pub async fn device_status<D: ReadingStore + Send + Sync + 'static>(
    query: web::Query<StatusQuery>,
    db: web::Data<D>,
    ctx: web::Data<ApiContext>)
-> HttpResponse {
    let request = StatusRequest {
        threshold_seconds: lenient_int("threshold", &query.threshold),
        window_hours: lenient_int("hours", &query.hours),
        window_limit: lenient_int("limit", &query.limit),
    };
    let now = Utc::now();

    let result = web::block(move || {
        report::device_status(db.get_ref(), &ctx.streams, now, &request, &ctx.settings)
    }).await;

    match result {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(err) => blocking_failed(err)
    }
}

pub async fn streams_list(ctx: web::Data<ApiContext>) -> HttpResponse {
    HttpResponse::Ok().json(&ctx.streams)
}

pub async fn stream_latest_reading<D: ReadingStore + Send + Sync + 'static>(
    path: web::Path<String>,
    db: web::Data<D>,
    ctx: web::Data<ApiContext>)
-> HttpResponse {
    let id = path.into_inner();
    if find_stream(&ctx.streams, &id).is_none() {
        return unknown_stream(&id);
    }

    let result = web::block(move || {
        db.latest(&id).and_then(|latest| latest.ok_or(DatabaseError::NotFound))
    }).await;

    match result {
        Ok(db_result) => map_db_call_to_http_response(db_result),
        Err(err) => blocking_failed(err)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadingsQuery {
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReadingsPage {
    stream: String,
    limit: usize,
    total: i64,
    /// Newest first.
    readings: Vec<Reading>,
}

pub async fn stream_readings<D: ReadingStore + Send + Sync + 'static>(
    path: web::Path<String>,
    query: web::Query<ReadingsQuery>,
    db: web::Data<D>,
    ctx: web::Data<ApiContext>)
-> HttpResponse {
    let id = path.into_inner();
    if find_stream(&ctx.streams, &id).is_none() {
        return unknown_stream(&id);
    }
    let limit = window::clamp_rows(lenient_int("limit", &query.limit).unwrap_or(window::MIN_WINDOW_ROWS as i64));

    let result = web::block(move || -> Result<ReadingsPage, DatabaseError> {
        let mut readings = db.most_recent(&id, Utc::now(), limit)?;
        readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        readings.truncate(limit);
        let total = db.count_readings(&id)?;
        Ok(ReadingsPage { stream: id, limit, total, readings })
    }).await;

    match result {
        Ok(db_result) => map_db_call_to_http_response(db_result),
        Err(err) => blocking_failed(err)
    }
}

#[derive(Debug, Deserialize)]
pub struct NewReading {
    value: f64,
    timestamp: Option<DateTime<Utc>>,
}

pub async fn add_reading<D: ReadingStore + Send + Sync + 'static>(
    path: web::Path<String>,
    body: web::Json<NewReading>,
    db: web::Data<D>,
    ctx: web::Data<ApiContext>)
-> HttpResponse {
    let id = path.into_inner();
    let descriptor = match find_stream(&ctx.streams, &id) {
        Some(descriptor) => descriptor,
        None => return unknown_stream(&id),
    };

    let body = body.into_inner();
    if !descriptor.accepts(body.value) {
        return HttpResponse::BadRequest().body(format!(
            "{} outside of [{}, {}] {}",
            body.value, descriptor.valid_min, descriptor.valid_max, descriptor.unit
        ));
    }

    let reading = Reading {
        stream_id: id,
        value: body.value,
        timestamp: body.timestamp.unwrap_or_else(Utc::now),
    };
    info!("[{}] {} @ {}", reading.stream_id, reading.value, reading.timestamp);

    let result = web::block(move || db.add_reading(&reading).map(|_| reading)).await;

    match result {
        Ok(Ok(reading)) => HttpResponse::Created().json(reading),
        Ok(Err(err)) => map_database_error_to_http(err),
        Err(err) => blocking_failed(err)
    }
}
