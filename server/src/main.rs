use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use xfer_server::AppState;

/// Flat-root file-transfer daemon.
#[derive(Parser, Debug)]
struct Args {
    /// Directory served as the flat namespace root.
    #[arg(long, env = "RDM_ROOT", default_value = ".")]
    root: PathBuf,

    /// URL path prefix every route is nested under.
    #[arg(long, env = "RDM_PREFIX", default_value = "/")]
    prefix: String,

    /// Shared secret clients must present via the Auth header. Unset disables auth.
    #[arg(long, env = "RDM_AUTH", default_value = "")]
    auth: String,

    #[arg(long, env = "RDM_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "RDM_PORT", default_value = "8597")]
    port: u16,

    /// How long an upload task may sit idle before it's dropped.
    #[arg(long, env = "RDM_UPLOAD_EXPIRY_SECS", default_value = "86400")]
    upload_expiry_secs: u64,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let root = args
        .root
        .canonicalize()
        .unwrap_or_else(|e| panic!("failed to resolve root {}: {e}", args.root.display()));
    let addr = format!("{}:{}", args.host, args.port);

    let state = AppState::new(
        root,
        Some(&args.auth).filter(|s| !s.is_empty()),
        Duration::from_secs(args.upload_expiry_secs),
    );
    let app = xfer_server::router(state, &args.prefix);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    log::info!("xferd listening on http://{addr} (set RDM_PORT to override)");
    axum::serve(listener, app).await.expect("server error");
}
