use federated_oidc::api::start_webserver;
use federated_oidc::client::{ClientRepo, DbClientRepo, MemClientRepo};
use federated_oidc::clock::{SharedClock, SystemClock};
use federated_oidc::config::{AppConfig, load_config};
use federated_oidc::connector::ConnectorRegistry;
use federated_oidc::key::{self, KeyManager};
use federated_oidc::oauth2::OAuth2State;
use federated_oidc::session::SessionManager;
use sea_orm::Database;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const SIGNING_KEY_BITS: usize = 2048;

fn initialize_standard_tracing() {
    let default_directives = "federated_oidc=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

async fn client_repo(config: &AppConfig) -> color_eyre::Result<Arc<dyn ClientRepo>> {
    match &config.database_url {
        Some(url) => {
            let db = Arc::new(Database::connect(url).await?);
            let repo = DbClientRepo::new(db);
            repo.install_schema().await?;
            let seeded = repo.seed(&config.clients).await?;
            tracing::info!(seeded, "Using database client registry");
            Ok(Arc::new(repo))
        }
        None => {
            let repo = MemClientRepo::from_clients(config.clients.clone())?;
            tracing::info!(clients = repo.len(), "Using in-memory client registry");
            Ok(Arc::new(repo))
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    initialize_standard_tracing();

    let config = load_config()?;
    let clock: SharedClock = Arc::new(SystemClock);

    let clients = client_repo(&config).await?;

    let connectors = Arc::new(ConnectorRegistry::new(
        config
            .connectors
            .iter()
            .map(|c| c.build())
            .collect::<Result<Vec<_>, _>>()?,
    )?);
    for (id, health) in connectors.health() {
        if let Err(e) = health {
            tracing::warn!(connector_id = %id, error = %e, "Connector unhealthy at startup");
        }
    }
    connectors.watch_sync();

    let sessions = Arc::new(SessionManager::in_memory(
        clock.clone(),
        config.session_config(),
    ));

    tracing::info!(bits = SIGNING_KEY_BITS, "Generating signing key");
    let signer = key::generate_blocking(SIGNING_KEY_BITS).await?;
    let keys = Arc::new(KeyManager::new(
        signer,
        clock.now() + config.key_rotation(),
        config.keep_previous_keys,
    ));
    key::spawn_rotation_task(
        keys.clone(),
        clock.clone(),
        config.key_rotation(),
        SIGNING_KEY_BITS,
    );

    // Start background purge of expired sessions and codes
    {
        let sessions = sessions.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                match sessions.purge_expired().await {
                    Ok((0, 0)) => {}
                    Ok((sessions, codes)) => {
                        tracing::debug!(sessions, codes, "Purged expired sessions")
                    }
                    Err(e) => tracing::error!(error = %e, "Session purge failed"),
                }
            }
        });
    }

    let state = OAuth2State::new(
        config.issuer_url.as_str(),
        clients,
        connectors,
        sessions,
        keys,
        clock,
    )
    .with_id_token_ttl(config.id_token_ttl())
    .with_registration(config.enable_registration);

    tracing::info!(issuer = %state.issuer, "Starting federated OIDC server");
    start_webserver(state, config.listen_addr).await?;
    Ok(())
}
