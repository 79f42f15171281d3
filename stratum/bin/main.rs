use anyhow::Result;
use ingot_stratum::cli;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    cli::run().await
}
