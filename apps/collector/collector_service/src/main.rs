use actix_web::{App, HttpResponse, HttpServer, web};
use chrono::Utc;
use common::collection::Collection;
use common::config::ServiceConfig;
use common::dataset::DatasetSink;
use common::helix::HelixClient;
use common::irc::TcpConnector;
use common::{CollectorStatus, logger};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

type SharedStatus = Arc<RwLock<CollectorStatus>>;

async fn health_check(status: web::Data<SharedStatus>) -> HttpResponse {
    let status = status.read().await;
    HttpResponse::Ok().json(json!({
        "status": status.status,
        "state": status.state,
        "channel": status.channel,
        "events_collected": status.events_collected,
        "total_events": status.total_events,
        "last_checkpoint": status.last_checkpoint,
        "last_metadata": status.last_metadata,
        "session_id": status.session_id,
        "timestamp": Utc::now()
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init();

    // Load configuration
    let config = ServiceConfig::new()?;
    let settings = config.collection_settings()?;
    info!("Starting collector service: {:?}", config);

    let status_source = HelixClient::new(
        &config.api_url,
        &config.client_id,
        config.api_bearer(),
        &config.channel,
    )?;
    let connector = TcpConnector::new(
        &config.irc_host,
        config.irc_port,
        config.identity(),
        config.session_options(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collection = Collection::new(
        connector,
        status_source,
        DatasetSink::new(&config.data_dir),
        config.keyword_matcher(),
        config.recovery_manager(),
        settings,
        shutdown_rx,
    )?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing with a checkpoint");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
        }
    });

    let health_server = match config.health_addr() {
        Some(addr) => {
            let data = web::Data::new(collection.status());
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(data.clone())
                    .route("/health", web::get().to(health_check))
            })
            .disable_signals()
            .bind(addr)?
            .run();

            info!("Health endpoint listening on {}", addr);
            let handle = server.handle();
            tokio::spawn(async move {
                if let Err(e) = server.await {
                    error!("Health server error: {:?}", e);
                }
            });
            Some(handle)
        }
        None => None,
    };

    let result = collection.run().await;

    if let Some(handle) = health_server {
        handle.stop(true).await;
    }

    match result {
        Ok(summary) => {
            info!(
                "Collector stopped ({:?}): {} new events, {} total",
                summary.exit, summary.events_collected, summary.total_events
            );
            Ok(())
        }
        Err(e) => {
            error!("Collector failed: {}", e);
            Err(e.into())
        }
    }
}
