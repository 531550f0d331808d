//! `mnemo chat` — interactive or single-message chat over the CLI channel.

use mnemo_agent::{Orchestrator, ReActEvent};
use mnemo_core::channel::ChannelAdapter;
use tracing::{debug, info};

use super::Runtime;
use crate::channel::CliChannel;

pub async fn run(message: Option<String>, user: String) -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::load()?;

    if !rt.config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set MNEMO_API_KEY or add api_key to:");
        eprintln!("    {}", mnemo_config::AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let channel = CliChannel::stdio(&user);
    let resolved = rt.engine.start_session(&user, channel.id().as_str()).await?;
    let session_id = resolved.session.session_id.clone();

    if let Some(msg) = message {
        converse(&rt.engine, &channel, &session_id, &user, &msg).await?;
    } else {
        println!();
        println!("  mnemo: interactive mode");
        println!("  Model:     {}", rt.config.default_model);
        println!("  Session:   {session_id}");
        if let Some(previous) = &resolved.previous_summary {
            println!("  Last time: {previous}");
        }
        println!("  Type 'exit' or Ctrl+D to quit.");
        println!();

        let maintenance = rt
            .config
            .memory
            .maintenance
            .enabled
            .then(|| rt.maintenance().start());

        loop {
            channel.send_delta(&user, "  You > ").await?;
            let Some(inbound) = channel.receive().await? else {
                break;
            };
            channel.send_delta(&user, "  mnemo > ").await?;
            if let Err(e) = converse(&rt.engine, &channel, &session_id, &user, &inbound.content).await {
                eprintln!("  [Error] {e}");
            }
        }

        if let Some(handle) = maintenance {
            handle.shutdown().await;
        }
    }

    let summary = rt.engine.end_session(&session_id).await?;
    info!(
        session_id = %summary.session_id,
        turns = summary.turn_count,
        topics = ?summary.topics,
        "Session closed"
    );
    Ok(())
}

/// Run one turn and render its events to the channel.
pub async fn converse<C: ChannelAdapter>(
    engine: &Orchestrator,
    channel: &C,
    session_id: &str,
    user: &str,
    input: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let streaming = channel.capabilities().supports_streaming;
    let mut buffered = String::new();
    let mut stream = engine.run_turn(session_id, input).await?;

    while let Some(event) = stream.next().await {
        match event {
            ReActEvent::MessageDelta { content } if streaming => {
                channel.send_delta(user, &content).await?;
            }
            ReActEvent::MessageDelta { content } => buffered.push_str(&content),
            ReActEvent::ThinkingDelta { .. } => {}
            ReActEvent::ToolCall { call } => eprintln!("  [tool] {}", call.tool_name),
            ReActEvent::ToolResult { result } => {
                if let Some(reason) = result.error {
                    eprintln!("  [tool failed] {reason}");
                }
            }
            ReActEvent::Error { message } => eprintln!("  [error] {message}"),
            ReActEvent::Done {
                usage,
                iterations,
                stop_reason,
            } => {
                channel.send(user, &buffered).await?;
                debug!(
                    tokens = usage.total(),
                    iterations,
                    stop_reason = stop_reason.as_str(),
                    "Turn finished"
                );
            }
        }
    }
    Ok(())
}
