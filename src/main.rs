use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use gatekeeper::notify::NotificationKind;
use gatekeeper::{AppState, Error, Notification, Settings};
use std::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Placeholder sink for the notification queue: it logs each message and
/// drops it. No mail or SMS is sent; a real transport replaces this worker.
async fn notification_worker(mut receiver: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = receiver.recv().await {
        match notification.kind {
            NotificationKind::Otp => info!(
                action = %notification.payload["action"],
                "Dispatching OTP mail to {}", notification.destination
            ),
            NotificationKind::Welcome => {
                info!("Dispatching welcome mail to {}", notification.destination)
            }
        }
    }
    info!("Notification queue closed");
}

#[actix_web::main]
async fn main() -> gatekeeper::Result<()> {
    // Load environment variables
    dotenv().ok();

    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Settings::new()?;
    info!("Configuration loaded successfully ({})", config.environment);

    let (state, notifications) = AppState::new(config.clone()).await?;
    tokio::spawn(notification_worker(notifications));

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!("Starting server at {}:{}", config.server.host, config.server.port);

    let state = web::Data::new(state);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
            .max_age(3600);

        App::new()
            .wrap(state.admission_gate())
            .wrap(cors)
            .app_data(state.clone())
            .configure(gatekeeper::configure)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(())
}
