use std::sync::Arc;

use tower_http::cors::CorsLayer;

use prompt_wizard_backend::catalog::CATALOG;
use prompt_wizard_backend::config::Config;
use prompt_wizard_backend::healing::build_classifier;
use prompt_wizard_backend::judge::SpellJudge;
use prompt_wizard_backend::llm::{JudgeService, ModerationService, OpenAiClient};
use prompt_wizard_backend::moderation::ModerationGate;
use prompt_wizard_backend::session::{SessionManager, TurnServices};
use prompt_wizard_backend::{api, db, metrics};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let db = db::Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    let client = config.openai_api_key.as_deref().map(|key| {
        Arc::new(OpenAiClient::new(
            key,
            &config.openai_base_url,
            &config.judge_model,
            &config.moderation_model,
            config.external_timeout,
        ))
    });
    if client.is_none() {
        tracing::warn!(
            "OPENAI_API_KEY not set; spells will be judged with fallback results and moderation is {:?}",
            config.moderation_policy
        );
    }
    let judge_service = client.clone().map(|c| c as Arc<dyn JudgeService>);
    let moderation_service = client.map(|c| c as Arc<dyn ModerationService>);

    let healing = build_classifier(config.healing_strategy, judge_service.clone());
    let services = Arc::new(TurnServices {
        judge: SpellJudge::new(judge_service, healing),
        moderation: ModerationGate::new(moderation_service, config.moderation_policy),
    });

    if config.debug_tools {
        tracing::warn!("Debug tools enabled: /api/players/{{id}}/debug/unlock-all is live");
    }
    let sessions = SessionManager::new(
        db,
        services,
        &CATALOG,
        config.max_player_health,
        config.debug_tools,
    );

    let app = api::router(sessions).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Prompt Wizard backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
