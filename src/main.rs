#[tokio::main]
async fn main() -> anyhow::Result<()> {
    anomaly_gateway::run().await
}
