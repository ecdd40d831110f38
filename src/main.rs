//! Fire ID backend server
//!
//! Main entry point.

use fireid_server::{
    ai_client::AiClient,
    analysis::AnalysisOrchestrator,
    change_notifier::{ChangeNotifier, HttpBroadcastPublisher, HttpMessageGateway, TelegramBot},
    contacts::{ContactDirectory, HttpContactDirectory},
    event_log_service::EventLogService,
    event_store::{EventRecordStore, HttpEventStore},
    evidence::{EvidenceArchiver, HttpObjectStore},
    local_buffer::LocalBuffer,
    realtime_hub::RealtimeHub,
    state::{AppConfig, AppState, SystemState},
    sync_service::ReconciliationSync,
    web_api,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fireid_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fire ID backend v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        ai_analyze_url = %config.ai_analyze_url,
        device_id = %config.device_id,
        "Configuration loaded"
    );

    // Local buffer pool
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    let buffer = LocalBuffer::new(pool);
    buffer.init().await?;
    tracing::info!("Local buffer connected");

    // In-process state, restored from the buffer
    let system = Arc::new(SystemState::new());
    system.restore_from(&buffer).await?;

    let event_log = Arc::new(EventLogService::default());
    let hub = Arc::new(RealtimeHub::new());

    // Cloud event store, disabled without an endpoint
    let record_store = match &config.store_base_url {
        Some(base_url) => EventRecordStore::new(Arc::new(HttpEventStore::new(
            base_url.clone(),
            config.events_table.clone(),
        ))),
        None => {
            tracing::warn!("STORE_BASE_URL not set, event persistence disabled");
            EventRecordStore::disabled()
        }
    };

    // Evidence archiver, disabled without an object store
    let archiver = match &config.object_store_base_url {
        Some(base_url) => EvidenceArchiver::new(Arc::new(HttpObjectStore::new(
            base_url.clone(),
            config.evidence_bucket.clone(),
        ))),
        None => {
            tracing::warn!("OBJECT_STORE_BASE_URL not set, evidence archiving disabled");
            EvidenceArchiver::disabled()
        }
    };

    // Contacts directory, disabled without a store endpoint
    let contacts: Option<Arc<dyn ContactDirectory>> = match &config.store_base_url {
        Some(base_url) => Some(Arc::new(HttpContactDirectory::new(
            base_url.clone(),
            config.contacts_table.clone(),
        ))),
        None => None,
    };

    let ai_client = AiClient::new(config.ai_analyze_url.clone());
    if !ai_client.health_check().await {
        tracing::warn!(
            url = %ai_client.analyze_url(),
            "AI service not reachable at startup, analyses will fail until it comes up"
        );
    }

    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        ai_client,
        record_store.clone(),
        archiver,
        hub.clone(),
        event_log.clone(),
        config.device_id.clone(),
        config.rtsp_url.clone(),
    ));
    tracing::info!("AnalysisOrchestrator initialized");

    // Alert fan-out channels
    let mut notifier = ChangeNotifier::new(record_store.clone());
    if let Some(topic_url) = &config.broadcast_topic_url {
        notifier = notifier.with_broadcast(Arc::new(HttpBroadcastPublisher::new(
            topic_url.clone(),
            config.broadcast_topic.clone(),
        )));
    }
    if let Some(token) = &config.telegram_bot_token {
        notifier = notifier.with_chat_bot(
            Arc::new(TelegramBot::new(token.clone())),
            config.telegram_chat_id.clone(),
        );
    }
    if let Some(gateway_url) = &config.message_gateway_url {
        notifier = notifier.with_gateway(Arc::new(HttpMessageGateway::new(gateway_url.clone())));
    }
    if let Some(directory) = &contacts {
        notifier = notifier.with_contacts(directory.clone());
    }
    notifier.log_channel_status();
    let notifier = Arc::new(notifier);

    // Create application state
    let state = AppState {
        config: config.clone(),
        buffer: buffer.clone(),
        system,
        orchestrator,
        record_store: record_store.clone(),
        notifier,
        contacts: contacts.clone(),
        hub,
        event_log,
    };

    // Start reconciliation sync scheduler
    let mut sync = ReconciliationSync::new(buffer, record_store, config.device_id.clone())
        .with_interval(Duration::from_secs(config.sync_interval_secs));
    if let Some(directory) = contacts {
        sync = sync.with_contacts(directory);
    }
    Arc::new(sync).start();
    tracing::info!(
        interval_secs = config.sync_interval_secs,
        "ReconciliationSync started"
    );

    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
