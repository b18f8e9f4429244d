#[tokio::main]
async fn main() {
    if let Err(e) = lectern::start_server().await {
        eprintln!("lectern failed to start: {}", e);
        std::process::exit(1);
    }
}
