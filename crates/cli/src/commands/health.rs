//! `mnemo health` — report every component of the engine.

use mnemo_core::health::HealthState;

use super::Runtime;

pub async fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::load()?;
    let status = rt.engine.health_check().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("mnemo health: {:?}", status.state);
    for (name, component) in &status.components {
        let mark = match component.state {
            HealthState::Healthy => "ok",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "FAIL",
        };
        match &component.message {
            Some(msg) => println!("  {name:<18} {mark:<9} {msg}"),
            None => println!("  {name:<18} {mark}"),
        }
    }
    Ok(())
}
