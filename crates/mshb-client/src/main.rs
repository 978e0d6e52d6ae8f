#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mshb_client_lib::run().await
}
