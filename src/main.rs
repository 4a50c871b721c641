use std::sync::Arc;

use secrecy::SecretString;
use signup_funnel::catalog::StepCatalog;
use signup_funnel::config::FunnelConfig;
use signup_funnel::manager::FunnelManager;
use signup_funnel::routes::{FunnelRouteState, funnel_routes};
use signup_funnel::store::{LibSqlStore, MemoryStore, PersistenceStore};
use signup_funnel::verification::{AuthProvider, HttpAuthProvider, StaticAuthProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let port: u16 = std::env::var("FUNNEL_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    eprintln!("signup-funnel v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/funnel", port);

    // ── Persistence ──────────────────────────────────────────────────────
    let backend: Arc<dyn PersistenceStore> = match std::env::var("FUNNEL_DB_PATH") {
        Ok(path) => {
            eprintln!("   Store: libSQL at {path}");
            Arc::new(
                LibSqlStore::new_local(std::path::Path::new(&path))
                    .await
                    .unwrap_or_else(|e| {
                        eprintln!("Error: Failed to open database at {}: {}", path, e);
                        std::process::exit(1);
                    }),
            )
        }
        Err(_) => {
            eprintln!("   Store: in-memory (set FUNNEL_DB_PATH to persist)");
            Arc::new(MemoryStore::new())
        }
    };

    // ── Identity provider ────────────────────────────────────────────────
    let provider: Arc<dyn AuthProvider> = match std::env::var("FUNNEL_AUTH_EXCHANGE_URL") {
        Ok(url) => {
            let client_id = std::env::var("FUNNEL_AUTH_CLIENT_ID").unwrap_or_else(|_| {
                eprintln!("Error: FUNNEL_AUTH_CLIENT_ID not set");
                std::process::exit(1);
            });
            let client_secret = std::env::var("FUNNEL_AUTH_CLIENT_SECRET").unwrap_or_else(|_| {
                eprintln!("Error: FUNNEL_AUTH_CLIENT_SECRET not set");
                std::process::exit(1);
            });
            eprintln!("   Identity provider: {url}");
            Arc::new(HttpAuthProvider::new(
                url,
                client_id,
                SecretString::from(client_secret),
            ))
        }
        Err(_) => {
            eprintln!("   Identity provider: static demo (every login is a new identity)");
            Arc::new(StaticAuthProvider::new_user(serde_json::json!({
                "issuer": "demo"
            })))
        }
    };

    let manager = Arc::new(FunnelManager::new(
        Arc::new(StepCatalog::standard()),
        backend,
        provider,
        FunnelConfig::default(),
    ));

    let app = funnel_routes(FunnelRouteState { manager });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "Funnel server started");
    axum::serve(listener, app).await?;

    Ok(())
}
