#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gdbox_server::run_main().await
}
