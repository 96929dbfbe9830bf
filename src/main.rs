use certfleet_operator::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run().await {
        eprintln!("certman-operator exited with an error: {e}");
        std::process::exit(1);
    }
}
