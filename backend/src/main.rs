use chrono::NaiveDate;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use activity_audit::{
    build_router,
    config::Config,
    models::user::UserContext,
    services::{app_log::AppLogLayer, user_directory::StaticUserResolver},
    AppState, AuditState,
};

fn demo_users() -> StaticUserResolver {
    StaticUserResolver::new()
        .with_user(UserContext {
            id: Some("1".into()),
            title: Some("Dr".into()),
            email: Some("ada@example.com".into()),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            sex: Some("F".into()),
            date_of_birth: NaiveDate::from_ymd_opt(1815, 12, 10),
            ..UserContext::default()
        })
        .with_user(UserContext {
            id: Some("2".into()),
            email: Some("alan@example.com".into()),
            first_name: Some("Alan".into()),
            last_name: Some("Turing".into()),
            ..UserContext::default()
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Start the audit writer before tracing so the app channel can join in
    let (audit, handle) = AuditState::start(&config.audit)?;
    let app_log_layer = config.audit.app_log_enabled.then(|| {
        AppLogLayer::new(audit.logger.clone()).with_min_level(config.audit.app_log_level)
    });

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "activity_audit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(app_log_layer)
        .init();

    tracing::info!(
        service_name = %config.audit.service_name,
        log_dir = %config.audit.log_dir.display(),
        time_zone = %config.audit.time_zone,
        app_log_enabled = config.audit.app_log_enabled,
        "Loaded configuration from environment/.env"
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, audit.clone(), Arc::new(demo_users()));
    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(err) = audit.logger.flush().await {
        tracing::warn!(error = %err, "Failed to flush audit logs");
    }
    handle.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}
