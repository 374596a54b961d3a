use actix_cors::Cors;
use actix_middleware::{CorrelationIdMiddleware, JwtValidator, Logging};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use faq_learning_service::{
    config::Config,
    db,
    extractors::{PgChatExtractor, PgTicketExtractor},
    jobs, logging,
    repository::Repositories,
    routes,
    services::ai::{AnthropicProvider, OpenAiProvider},
    services::FaqAiProvider,
    state::AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_actix_web::TracingLogger;

fn build_validator(cfg: &Config) -> anyhow::Result<JwtValidator> {
    match (&cfg.jwt_public_key_pem, &cfg.jwt_secret) {
        (Some(pem), _) => JwtValidator::rs256_pem(pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid JWT public key: {e}")),
        (None, Some(secret)) => Ok(JwtValidator::hs256(secret.as_bytes())),
        (None, None) => anyhow::bail!("no JWT verification key configured"),
    }
}

fn build_providers(cfg: &Config) -> anyhow::Result<Vec<Arc<dyn FaqAiProvider>>> {
    let timeout = Duration::from_secs(cfg.ai_request_timeout_secs);
    let openai = OpenAiProvider::new(&cfg.openai, timeout).context("build OpenAI client")?;
    let anthropic =
        AnthropicProvider::new(&cfg.anthropic, timeout).context("build Anthropic client")?;
    Ok(vec![
        Arc::new(openai) as Arc<dyn FaqAiProvider>,
        Arc::new(anthropic),
    ])
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cfg = Config::from_env().context("load configuration")?;
    tracing::info!(
        service = %cfg.service_name,
        environment = %cfg.environment,
        "Starting FAQ learning service"
    );

    let pool = db::init_pool(&cfg.database_url, cfg.db_max_connections)
        .await
        .context("connect to database")?;

    let state = AppState::new(
        Repositories::postgres(pool.clone()),
        build_providers(&cfg)?,
        &cfg.default_ai_provider,
        Arc::new(PgChatExtractor::new(pool.clone())),
        Arc::new(PgTicketExtractor::new(pool)),
        cfg.pipeline_lease_ttl_secs,
    );
    if let Err(e) = state.ai.load_persisted_provider().await {
        tracing::warn!(error = %e, "Could not restore persisted AI provider");
    }

    if cfg.scheduler_enabled {
        let learning = state.learning.clone();
        tokio::spawn(async move { jobs::start_learning_scheduler(learning).await });
    } else {
        tracing::info!("Scheduled learning disabled");
    }

    let validator = Arc::new(build_validator(&cfg)?);
    let bind_addr = format!("{}:{}", cfg.host, cfg.port);
    tracing::info!(%bind_addr, "HTTP server listening");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(Logging)
            .wrap(CorrelationIdMiddleware)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .app_data(web::JsonConfig::default().limit(256 * 1024))
            .configure(|c| routes::configure(c, validator.clone()))
    })
    .bind(&bind_addr)
    .with_context(|| format!("bind {bind_addr}"))?
    .run()
    .await
    .context("run HTTP server")?;

    Ok(())
}
