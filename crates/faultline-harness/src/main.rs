//! Binary entrypoint for the faultline harness.
use anyhow::Context;
use faultline_harness::{run, HarnessPlan};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Plan path can be overridden with FAULTLINE_PLAN
    let path = std::env::var("FAULTLINE_PLAN").unwrap_or_else(|_| "plans/example.yaml".to_string());
    let plan = HarnessPlan::from_yaml_file(&path)
        .with_context(|| format!("loading plan {}", path))?;

    let report = run(plan).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
