use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::core::system::ControlPlane;
use crate::interfaces::web::ApiServer;

fn print_help() {
    println!("fleethub - control plane for a fleet of coding agents\n");
    println!("Usage: fleethub [serve]\n");
    println!("Commands:");
    println!("  serve    Start the control plane daemon (default)");
    println!("\nConfiguration comes from the environment: DASHBOARD_API_KEY (required),");
    println!("HOST, PORT, DATA_DIR, ALLOWED_ORIGINS, LINEAR_WEBHOOK_SECRET,");
    println!("RATE_LIMIT_WINDOW_MS, RATE_LIMIT_MAX_REQUESTS.");
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        None | Some("serve") => serve().await,
        Some("--help") | Some("-h") | Some("help") => {
            print_help();
            Ok(())
        }
        Some(other) => {
            print_help();
            anyhow::bail!("unknown command: {other}");
        }
    }
}

async fn serve() -> Result<()> {
    let log_tx = crate::logging::init(false);
    let config = Config::from_env()?;

    info!(
        "Starting fleethub control plane (data dir: {})",
        config.data_dir.display()
    );

    let plane = ControlPlane::init(config.clone()).await?;
    let server = ApiServer::new(plane.clone(), log_tx);

    server.serve().await?;

    plane.shutdown().await;
    info!("fleethub stopped.");
    Ok(())
}
