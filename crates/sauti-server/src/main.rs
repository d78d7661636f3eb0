//! Sauti gateway server - websocket front end for the speech-to-speech model service

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod state;

use sauti_core::bedrock::BedrockClientFactory;
use sauti_core::{SessionManager, DEFAULT_MODEL_ID, DEFAULT_REGION, SHUTDOWN_DEADLINE};
use sauti_tools::{
    DateTimeTool, GeocodeTool, KnowledgeBaseTool, ReasoningTool, ToolRegistry, WeatherTool,
    WikipediaTool,
};
use state::AppState;

#[derive(Debug, Parser)]
#[command(
    name = "sauti-server",
    about = "Realtime voice-assistant gateway",
    version = env!("CARGO_PKG_VERSION")
)]
struct ServerArgs {
    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BindConfig {
    host: String,
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sauti_server=info,sauti_core=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sauti gateway");

    let tools = Arc::new(build_tool_registry().await?);
    info!(tools = tools.names().len(), "tool registry ready");

    let model_id = env_or("SAUTI_MODEL_ID", DEFAULT_MODEL_ID);
    let factory = Arc::new(BedrockClientFactory::new(model_id));
    let sessions = Arc::new(SessionManager::new(factory, tools));
    let state = AppState::new(sessions.clone());

    let sweeper = sessions.spawn_sweeper(state.shutdown.clone());

    // Build router
    let app = api::create_router(state.clone());

    // Start server
    let bind = resolve_bind_config(args);
    let addr = format!("{}:{}", bind.host, bind.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    info!("Server ready. Press Ctrl+C to stop.");
    server.await?;

    // Drain every live session before exiting; exit non-zero when the
    // deadline forced any of them closed.
    state.shutdown.cancel();
    let clean = sessions.shutdown_all(SHUTDOWN_DEADLINE).await;
    sweeper.abort();
    if !clean {
        warn!("shutdown deadline expired with sessions force-closed");
        std::process::exit(1);
    }
    info!("shutdown complete");
    Ok(())
}

/// Tools are registered once at startup; cloud-backed tools only when their
/// configuration is present.
async fn build_tool_registry() -> anyhow::Result<ToolRegistry> {
    let mut tools = ToolRegistry::new();
    tools.register(DateTimeTool);

    let http = reqwest::Client::builder()
        .user_agent(format!("sauti-server/{}", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(15))
        .build()?;
    tools.register(GeocodeTool::new(http.clone()));
    tools.register(WeatherTool::new(http.clone()));
    tools.register(WikipediaTool::new(http));

    let knowledge_base_id = non_empty_env("SAUTI_KNOWLEDGE_BASE_ID");
    let reasoning_model = non_empty_env("SAUTI_REASONING_MODEL_ARN");
    if knowledge_base_id.is_some() || reasoning_model.is_some() {
        let region = env_or("AWS_DEFAULT_REGION", DEFAULT_REGION);
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .load()
            .await;
        if let Some(kb_id) = knowledge_base_id {
            tools.register(KnowledgeBaseTool::new(
                aws_sdk_bedrockagentruntime::Client::new(&config),
                kb_id,
            ));
        }
        if let Some(model_arn) = reasoning_model {
            tools.register(ReasoningTool::new(
                aws_sdk_bedrockruntime::Client::new(&config),
                model_arn,
            ));
        }
    }

    Ok(tools)
}

fn resolve_bind_config(args: ServerArgs) -> BindConfig {
    BindConfig {
        host: args.host.unwrap_or_else(host_from_env_or_default),
        port: args.port.unwrap_or_else(port_from_env_or_default),
    }
}

fn host_from_env_or_default() -> String {
    match std::env::var("HOST") {
        Ok(raw) => {
            let host = raw.trim();
            if host.is_empty() {
                warn!("Empty HOST, falling back to 0.0.0.0");
                "0.0.0.0".to_string()
            } else {
                host.to_string()
            }
        }
        Err(_) => "0.0.0.0".to_string(),
    }
}

fn port_from_env_or_default() -> u16 {
    match std::env::var("PORT") {
        Ok(raw) => match raw.trim().parse::<u16>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid PORT='{}', falling back to 8000", raw);
                8000
            }
        },
        Err(_) => 8000,
    }
}

fn env_or(key: &str, default: &str) -> String {
    non_empty_env(key).unwrap_or_else(|| default.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .expect("environment lock poisoned")
    }

    fn clear_bind_env() {
        std::env::remove_var("HOST");
        std::env::remove_var("PORT");
    }

    fn parse(args: &[&str]) -> ServerArgs {
        ServerArgs::try_parse_from(args).expect("arguments should parse")
    }

    #[test]
    fn cli_values_override_environment() {
        let _guard = env_lock();
        clear_bind_env();
        std::env::set_var("HOST", "0.0.0.0");
        std::env::set_var("PORT", "8000");

        let bind = resolve_bind_config(parse(&[
            "sauti-server",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
        ]));

        assert_eq!(bind.host, "127.0.0.1");
        assert_eq!(bind.port, 9000);
        clear_bind_env();
    }

    #[test]
    fn uses_environment_when_cli_values_missing() {
        let _guard = env_lock();
        clear_bind_env();
        std::env::set_var("HOST", "127.0.0.1");
        std::env::set_var("PORT", "8088");

        let bind = resolve_bind_config(parse(&["sauti-server"]));

        assert_eq!(bind.host, "127.0.0.1");
        assert_eq!(bind.port, 8088);
        clear_bind_env();
    }

    #[test]
    fn falls_back_to_defaults_without_cli_or_environment() {
        let _guard = env_lock();
        clear_bind_env();

        let bind = resolve_bind_config(parse(&["sauti-server"]));

        assert_eq!(bind.host, "0.0.0.0");
        assert_eq!(bind.port, 8000);
    }

    #[test]
    fn falls_back_to_default_when_env_port_is_invalid() {
        let _guard = env_lock();
        clear_bind_env();
        std::env::set_var("PORT", "not-a-port");

        let bind = resolve_bind_config(parse(&["sauti-server"]));

        assert_eq!(bind.port, 8000);
        clear_bind_env();
    }
}
