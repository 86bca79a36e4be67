use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    rove_cli::run().await
}
