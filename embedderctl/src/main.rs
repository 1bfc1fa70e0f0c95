use clap::Parser;

#[tokio::main]
async fn main() {
    embedderctl::init_tracing();
    let cli = embedderctl::Cli::parse();
    if let Err(err) = embedderctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
