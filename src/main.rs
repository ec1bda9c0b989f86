#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kiosk_rotator_lib::run().await
}
