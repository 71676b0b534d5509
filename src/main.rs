use std::io;

use actix_web::{web, App, HttpServer, middleware::Logger};
use log::{error, info};

use fieldmon::{api, config::AppConfig, database::ReadingStore, sqlite_database::SqliteDatabase};

fn build_http<D: ReadingStore + Send + Sync + 'static>(db: D, config: &AppConfig) -> io::Result<actix_web::dev::Server> {
    let db = web::Data::new(db);
    let context = web::Data::new(api::ApiContext {
        streams: config.streams.clone(),
        settings: config.report_settings(),
    });
    let static_dir = config.server.static_dir.clone();

    let srv = HttpServer::new(move || {
            App::new()
                .wrap(Logger::default())
                .app_data(db.clone())
                .app_data(context.clone())
                .app_data(web::JsonConfig::default().limit(4096))
                .configure(api::configure::<D>)
                .service(actix_files::Files::new("/", static_dir.clone())
                    .use_etag(true)
                    .index_file("index.html")
                    .default_handler(web::route().to(api::not_found)))
        })
        .bind(&config.server.bind)?
        .shutdown_timeout(config.server.shutdown_timeout_secs)
        .run();

    Ok(srv)
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::locate().map_err(|err| {
        error!("{}", err);
        io::Error::new(io::ErrorKind::InvalidInput, err.to_string())
    })?;
    config.log_summary();

    let database = SqliteDatabase::new(&config.database.path).map_err(|err| {
        error!("Could not open database: {}", err);
        io::Error::new(io::ErrorKind::Other, err.to_string())
    })?;

    info!("Running the app...");
    build_http(database, &config)?.await?;

    info!("Server stopped");
    Ok(())
}
