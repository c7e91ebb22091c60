//! TaskBridge CLI - Command line interface for the TaskBridge server.

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use taskbridge_core::EngineKind;
use tracing_subscriber::EnvFilter;

mod client;

use client::{parse_json_arg, BridgeClient};

/// TaskBridge CLI - schedule and control tasks
#[derive(Parser)]
#[command(name = "taskbridge")]
#[command(about = "CLI for the TaskBridge orchestration server", long_about = None)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule a task
    Schedule {
        /// Task type (workflow name)
        task_type: String,

        /// Payload JSON
        #[arg(short, long)]
        payload: Option<String>,

        /// Run on the durable engine
        #[arg(long, conflicts_with = "simple")]
        complex: bool,

        /// Run on the job queue
        #[arg(long)]
        simple: bool,

        /// Job queue to submit to (simple tasks)
        #[arg(short, long)]
        queue: Option<String>,

        /// Workflow type to start (complex tasks)
        #[arg(long)]
        workflow_type: Option<String>,

        /// Durable task queue (complex tasks)
        #[arg(long)]
        task_queue: Option<String>,

        /// Job priority (higher runs first)
        #[arg(long)]
        priority: Option<i32>,

        /// Queue that receives a tracking record (durable only)
        #[arg(long)]
        tracking_queue: Option<String>,

        /// Caller-chosen execution id
        #[arg(long)]
        id: Option<String>,

        /// Maximum attempts
        #[arg(long)]
        attempts: Option<u32>,

        /// Execution timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Get execution status
    Status {
        /// Execution id (qualified or legacy)
        id: String,

        /// Engine hint for unqualified ids
        #[arg(short, long)]
        engine: Option<EngineKind>,
    },

    /// Cancel an execution
    Cancel {
        id: String,

        #[arg(short, long)]
        engine: Option<EngineKind>,
    },

    /// Send a signal to a durable execution
    Signal {
        id: String,

        /// Signal name
        name: String,

        /// Signal payload JSON
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// Wait for an execution's result
    #[command(name = "result")]
    Wait {
        id: String,

        #[arg(short, long)]
        engine: Option<EngineKind>,

        /// Give up after this many milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = BridgeClient::new(&cli.addr);

    match cli.command {
        Commands::Schedule {
            task_type,
            payload,
            complex,
            simple,
            queue,
            workflow_type,
            task_queue,
            priority,
            tracking_queue,
            id,
            attempts,
            timeout_ms,
        } => {
            let mut body = Map::new();
            body.insert("task_type".into(), json!(task_type));
            body.insert("payload".into(), parse_json_arg(payload.as_deref())?);
            if complex || simple {
                body.insert("is_complex".into(), json!(complex));
            }
            insert_opt(&mut body, "queue", queue);
            insert_opt(&mut body, "workflow_type", workflow_type);
            insert_opt(&mut body, "task_queue", task_queue);
            insert_opt(&mut body, "priority", priority);
            insert_opt(&mut body, "tracking_queue", tracking_queue);
            insert_opt(&mut body, "execution_id", id);
            insert_opt(&mut body, "max_attempts", attempts);
            insert_opt(&mut body, "timeout_ms", timeout_ms);

            let handle = client.schedule(Value::Object(body)).await?;
            print_json(&handle)?;
        }
        Commands::Status { id, engine } => {
            let status = client.status(&id, engine).await?;
            print_json(&status)?;
        }
        Commands::Cancel { id, engine } => {
            let response = client.cancel(&id, engine).await?;
            print_json(&response)?;
        }
        Commands::Signal { id, name, payload } => {
            client
                .signal(&id, &name, parse_json_arg(payload.as_deref())?)
                .await?;
            print_json(&json!({ "execution_id": id, "signal": name, "sent": true }))?;
        }
        Commands::Wait {
            id,
            engine,
            timeout_ms,
        } => {
            let response = client.result(&id, engine, timeout_ms).await?;
            print_json(&response["value"])?;
        }
        Commands::Health => {
            if client.health().await? {
                println!("ok");
            } else {
                println!("unhealthy");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn insert_opt<T: Into<Value>>(body: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        body.insert(key.to_string(), value.into());
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
