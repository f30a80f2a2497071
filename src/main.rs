use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = edgeward::cli::Cli::parse();
    if let Err(e) = edgeward::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
