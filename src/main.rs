use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use groupsplit::config::Settings;
use groupsplit::ledger::ExpenseLedger;
use groupsplit::mongo::MongoStore;
use groupsplit::routes::{self, AppState};
use groupsplit::telemetry;
use mongodb::Client;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    telemetry::init();

    let settings = Settings::new().expect("You need to set MONGODB_URI and AUTH_SECRET");
    tracing::info!(database = %settings.database, "connecting to MongoDB");

    let client = Client::with_uri_str(&settings.mongodb_uri)
        .await
        .expect("failed to connect");
    tracing::info!("connected");

    let store = Arc::new(MongoStore::new(&client, &settings.database));
    let state = web::Data::new(AppState {
        ledger: ExpenseLedger::new(store, settings.split_policy()),
        auth: settings.auth(),
    });

    tracing::info!(address = %settings.bind_address, port = settings.port, "listening");
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(routes::configure)
    })
    .bind((settings.bind_address.as_str(), settings.port))?
    .run()
    .await
}
