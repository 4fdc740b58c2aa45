use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = confmux::cli::Cli::parse();
    if let Err(e) = confmux::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
