#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_portal_rust::run().await {
        eprintln!("exam-portal fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
