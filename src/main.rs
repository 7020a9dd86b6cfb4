use fleethub::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_main().await {
        eprintln!("fleethub: {e:#}");
        std::process::exit(1);
    }
}
