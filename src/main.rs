use clap::Parser;
use screenlink::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let report = screenlink::run(args).await?;
    println!(
        "{} session {} ended ({}) after {}s",
        report.role,
        report.session_id,
        report.reason,
        (report.ended_at - report.started_at).num_seconds()
    );
    Ok(())
}
