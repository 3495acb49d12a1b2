use hemmer_provider_mongodb::{init_logging, serve, MongoProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting MongoDB provider");
    serve(MongoProvider::new()).await
}
