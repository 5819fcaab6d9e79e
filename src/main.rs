use std::{net::SocketAddr, sync::Arc};

use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use bazaar_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    if cfg.gateway.secret_key.is_empty() {
        warn!("Payment gateway secret key is not set; gateway calls will be rejected");
    }
    let gateway: Arc<dyn api::payment_gateway::PaymentGateway> =
        Arc::new(api::payment_gateway::PaystackGateway::new(&cfg.gateway)?);

    // Aggregate app services used by HTTP handlers
    let services =
        api::handlers::AppServices::new(db_arc.clone(), event_sender.clone(), &cfg, gateway);

    let cors_layer = build_cors_layer(&cfg)?;
    let port = cfg.port;
    let host = cfg.host.clone();

    // Compose shared app state
    let app_state = api::AppState {
        db: db_arc,
        config: Arc::new(cfg),
        event_sender,
        services,
    };

    let app = api::build_router(app_state).layer(cors_layer);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("bazaar-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("bazaar-api stopped");
    Ok(())
}

fn build_cors_layer(cfg: &api::config::AppConfig) -> Result<CorsLayer, String> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any))
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        Ok(CorsLayer::permissive())
    } else {
        error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        Err("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true".into())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
