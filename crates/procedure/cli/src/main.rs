#![deny(unsafe_code)]

#[tokio::main]
async fn main() {
    if let Err(err) = procedure_cli::run().await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
