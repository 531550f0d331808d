//! `mnemo maintain` — one decay, consolidation, prune and trim pass.

use super::Runtime;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::load()?;
    let report = rt.maintenance().run_once().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
