use std::{path::PathBuf, sync::Arc};

use {
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    wagate_gateway::{AppState, start_gateway},
    wagate_webhook::WebhookRelay,
    wagate_whatsapp::{
        ConnectionSupervisor, DEFAULT_SIDECAR_PORT, SessionRegistry, SidecarClient,
        SidecarSettings, client::WaClient,
    },
};

#[derive(Parser)]
#[command(name = "wagate", about = "wagate — WhatsApp Web HTTP gateway")]
struct Cli {
    /// Address to bind to.
    #[arg(long, env = "WAGATE_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on.
    #[arg(long, env = "WAGATE_PORT", default_value_t = 3333)]
    port: u16,

    /// Destination URL for webhook event delivery.
    #[arg(long, env = "WAGATE_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Root directory for per-instance credential storage.
    #[arg(long, env = "WAGATE_SESSIONS_DIR", default_value = "sessions")]
    sessions_dir: PathBuf,

    /// Directory containing the Baileys sidecar (autodiscovered when unset).
    #[arg(long, env = "WAGATE_SIDECAR_DIR")]
    sidecar_dir: Option<PathBuf>,

    /// Port of the sidecar WebSocket server.
    #[arg(long, env = "WAGATE_SIDECAR_PORT", default_value_t = DEFAULT_SIDECAR_PORT)]
    sidecar_port: u16,

    /// Do not spawn the sidecar process; connect to an already-running one.
    #[arg(long, default_value_t = false)]
    no_sidecar_autostart: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    std::fs::create_dir_all(&cli.sessions_dir)?;

    let registry = Arc::new(SessionRegistry::new(&cli.sessions_dir));
    let relay = Arc::new(WebhookRelay::new(cli.webhook_url.clone()));
    if !relay.is_configured() {
        warn!("no webhook url configured, protocol events will not be delivered");
    }

    let client = Arc::new(SidecarClient::new(SidecarSettings {
        port: cli.sidecar_port,
        sidecar_dir: cli.sidecar_dir.clone(),
        auto_start: !cli.no_sidecar_autostart,
    }));
    let supervisor = ConnectionSupervisor::new(
        registry,
        Arc::clone(&client) as Arc<dyn WaClient>,
        relay,
    );

    info!(bind = %cli.bind, port = cli.port, "starting wagate");
    let result = start_gateway(&cli.bind, cli.port, AppState::new(supervisor)).await;

    client.shutdown().await;
    result
}
