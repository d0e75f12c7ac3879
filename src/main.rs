use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use agentlink::ag_ui::{translate_stream, AgUiEvent};
use agentlink::domain::schema::{ParamType, Parameter};
use agentlink::domain::transcript::Role;
use agentlink::runtime::ChannelUpstream;
use agentlink::{
    ActionDeclaration, ActionDefinition, ActionEffect, Engine, EngineConfig, Patch, RenderStatus,
};

#[derive(Parser, Debug)]
#[command(name = "agentlink", version, about = "Replay a scripted post-generation run")]
struct Args {
    /// Engine configuration (JSON).
    #[arg(long, env = "AGENTLINK_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "demo-session")]
    session: String,
}

// ---------------------------------------------------------------------------
// The demo action: render generated posts, reset the progress log when done
// ---------------------------------------------------------------------------

fn generate_post(tool_log_key: String) -> ActionDefinition {
    let post = || {
        vec![
            Parameter::new("title", ParamType::String).describe("Post title"),
            Parameter::new("content", ParamType::String).describe("Post body"),
        ]
    };
    let declaration = ActionDeclaration::new(
        "generate_post",
        "Render the generated tweet and LinkedIn post",
    )
    .param(
        Parameter::new("tweet", ParamType::Object)
            .describe("The tweet")
            .with_attributes(post()),
    )
    .param(
        Parameter::new("linkedIn", ParamType::Object)
            .describe("The LinkedIn post")
            .with_attributes(post()),
    );

    ActionDefinition::new(declaration)
        .render_with(|args, status| {
            let title = |key: &str| args[key]["title"].as_str().unwrap_or("…").to_string();
            let view = json!({
                "tweet": title("tweet"),
                "linkedIn": title("linkedIn"),
                "loading": status == RenderStatus::Partial,
            });
            println!("[render:{status:?}] {view}");
            view
        })
        .handle_with(move |args, _state| {
            let tweet = args["tweet"]["content"].as_str().unwrap_or_default();
            Ok(vec![
                ActionEffect::PatchState(Patch::new().reset_list(tool_log_key.clone())),
                ActionEffect::AppendMessage {
                    role: Role::Assistant,
                    content: format!("Posts ready. Tweet: {tweet}"),
                },
                ActionEffect::SetFlag {
                    name: "showHeader".into(),
                    value: json!(false),
                },
            ])
        })
}

fn scripted_run(thread_id: &str, tool_log_key: &str) -> Vec<AgUiEvent> {
    let logs = |entries: serde_json::Value| AgUiEvent::StateSnapshot {
        snapshot: json!({ tool_log_key: entries }),
    };
    let args = r#"{"tweet":{"title":"Rust 2024","content":"Fearless concurrency, now with async closures."},"linkedIn":{"title":"Why we moved to Rust","content":"A year in, fewer incidents."}}"#;
    let (head, tail) = args.split_at(40);

    vec![
        AgUiEvent::RunStarted {
            thread_id: thread_id.into(),
            run_id: "run-1".into(),
        },
        logs(json!([{"message": "Searching the web", "status": "processing"}])),
        logs(json!([
            {"message": "Searching the web", "status": "completed"},
            {"message": "Drafting posts", "status": "processing"}
        ])),
        AgUiEvent::ToolCallStart {
            tool_call_id: "call-0".into(),
            tool_call_name: "foo_bar".into(),
            parent_message_id: None,
        },
        AgUiEvent::ToolCallArgs {
            tool_call_id: "call-0".into(),
            delta: "{}".into(),
        },
        AgUiEvent::ToolCallEnd {
            tool_call_id: "call-0".into(),
        },
        AgUiEvent::ToolCallStart {
            tool_call_id: "call-1".into(),
            tool_call_name: "generate_post".into(),
            parent_message_id: None,
        },
        AgUiEvent::ToolCallArgs {
            tool_call_id: "call-1".into(),
            delta: head.into(),
        },
        AgUiEvent::ToolCallArgs {
            tool_call_id: "call-1".into(),
            delta: tail.into(),
        },
        AgUiEvent::ToolCallEnd {
            tool_call_id: "call-1".into(),
        },
        AgUiEvent::RunFinished {
            thread_id: thread_id.into(),
            run_id: "run-1".into(),
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let tool_log_key = config.tool_log_key.clone();
    let agent = config.default_agent.clone();

    // 1. Engine with an in-process upstream that just prints run requests
    let (upstream, mut runs) = ChannelUpstream::new();
    let engine = Engine::new(config).with_upstream(Arc::new(upstream));
    tokio::spawn(async move {
        while let Some(run) = runs.recv().await {
            println!(
                "[upstream] run {} for thread {} ({} messages, {} tools)",
                run.run_id,
                run.thread_id,
                run.messages.len(),
                run.tools.len()
            );
        }
    });

    // 2. Session, action and subscribers
    let session = engine
        .open(&args.session, json!({ tool_log_key.as_str(): [] }))
        .await?;
    session
        .register_action(generate_post(tool_log_key.clone()))
        .await?;
    let key = tool_log_key.clone();
    let _state_sub = session
        .subscribe(move |snapshot| {
            let count = snapshot
                .get(&key)
                .and_then(|v| v.as_array())
                .map_or(0, Vec::len);
            println!("[state v{}] {key}: {count} entries", snapshot.version);
        })
        .await?;

    // 3. User asks; the scripted agent answers
    session
        .append_user_message("Write posts about Rust's latest release")
        .await?;
    let events = scripted_run(&args.session, &tool_log_key)
        .into_iter()
        .map(Ok);
    engine
        .run_stream(&args.session, translate_stream(agent, tokio_stream::iter(events)))
        .await?;
    while session.handlers_in_flight().await? > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // 4. Report
    let state = session.get_state().await?;
    println!("final state (v{}): {}", state.version, state.to_value());
    for message in session.transcript().await?.all() {
        println!("#{} {:?}: {}", message.sequence, message.role, message.content);
    }
    for diagnostic in session.diagnostics().await? {
        println!("diagnostic: {}", diagnostic.fault);
    }
    println!("flags: {}", serde_json::Value::Object(session.flags().await?));

    engine.shutdown().await;
    Ok(())
}
