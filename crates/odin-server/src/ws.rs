//! Websocket command dispatch.
//!
//! Each inbound frame names a command; responses stream back as OK frames
//! and finish with END (or a single ERROR). A client that disconnects
//! mid-stream never cancels the pipeline behind it.

use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use odin_config::read_pipeline_config;
use odin_executor::Executor;
use odin_k8s::TaskManager;

use crate::cleanup::cleanup;
use crate::context::{ServerContext, current_revision};
use crate::protocol::{ApiStatus, Request, frame};
use crate::status::get_status;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<ServerContext>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn send(
    socket: &mut WebSocket,
    status: ApiStatus,
    response: Value,
    extra: &Map<String, Value>,
) -> Result<(), axum::Error> {
    socket
        .send(Message::Text(frame(status, &response, extra).into()))
        .await
}

async fn handle_socket(mut socket: WebSocket, ctx: Arc<ServerContext>) {
    tracing::info!("connection established");
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        tracing::info!(request = %text, "received");
        let request: Request = match serde_json::from_str(&text) {
            Ok(request) => request,
            Err(err) => {
                let _ = send(
                    &mut socket,
                    ApiStatus::Error,
                    json!(err.to_string()),
                    &Map::new(),
                )
                .await;
                continue;
            }
        };
        let extra = request.extra.clone();
        if let Err(err) = dispatch(&mut socket, &ctx, request).await {
            tracing::error!(error = %err, "command failed");
            let _ = send(&mut socket, ApiStatus::Error, json!(err.to_string()), &extra).await;
        }
    }
    tracing::info!("connection closed");
}

async fn dispatch(
    socket: &mut WebSocket,
    ctx: &Arc<ServerContext>,
    request: Request,
) -> anyhow::Result<()> {
    let extra = request.extra;
    let work = request.request;
    match request.command.as_str() {
        "START" => start(socket, ctx, work, &extra).await,
        "STATUS" => {
            let pattern = work.as_str().context("STATUS request must be a pattern")?;
            let labels = ctx.store.parents_like(pattern).await?;
            let mut results = Vec::new();
            for label in labels {
                match get_status(&label, ctx.store.as_ref()).await {
                    Ok((pipe, rows)) => results.push(json!({
                        "pipeline_status": pipe,
                        "task_statuses": rows,
                    })),
                    Err(err) => {
                        tracing::warn!(pipeline = %label, error = %err, "skipping");
                    }
                }
            }
            let _ = send(socket, ApiStatus::Ok, json!(results), &extra).await;
            Ok(())
        }
        "CLEANUP" => {
            let options = work.as_object().context("CLEANUP request must be an object")?;
            let target = options
                .get("work")
                .and_then(Value::as_str)
                .context("CLEANUP request must name a pipeline")?;
            let purge_db = options.get("purge_db").and_then(Value::as_bool).unwrap_or(false);
            let purge_fs = options.get("purge_fs").and_then(Value::as_bool).unwrap_or(false);
            let cleaned = cleanup(
                target,
                ctx.store.as_ref(),
                &ctx.manager,
                purge_db,
                purge_fs,
                &ctx.data_path,
            )
            .await?;
            let _ = send(socket, ApiStatus::Ok, json!(cleaned), &extra).await;
            Ok(())
        }
        "EVENTS" => {
            let resource = work
                .get("resource")
                .and_then(Value::as_str)
                .context("EVENTS request must name a resource")?;
            let events = ctx.manager.get_events(resource).await?;
            let _ = send(socket, ApiStatus::Ok, json!(events), &extra).await;
            Ok(())
        }
        "DATA" => {
            let resource = work
                .get("resource")
                .and_then(Value::as_str)
                .context("DATA request must name a resource")?;
            let record = ctx.store.get(resource).await?;
            let _ = send(socket, ApiStatus::Ok, record, &extra).await;
            Ok(())
        }
        "LOGS" => logs(socket, ctx, work, &extra).await,
        "PING" => {
            let scalar = match &work {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            let _ = send(socket, ApiStatus::Ok, json!(format!("PONG {scalar}")), &extra).await;
            Ok(())
        }
        "SHOW" => {
            let work = work.as_str().context("SHOW request must be a directory")?;
            let dir = ctx.root_path.join(work);
            let mut files = Map::new();
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    files.insert(
                        entry.file_name().to_string_lossy().to_string(),
                        json!(std::fs::read_to_string(entry.path())?),
                    );
                }
            }
            let _ = send(socket, ApiStatus::Ok, Value::Object(files), &extra).await;
            Ok(())
        }
        "GENERATE" => {
            let Some(generator) = &ctx.generator else {
                anyhow::bail!("no pipeline generator configured");
            };
            let name = generator.generate(&ctx.root_path, work).await?;
            let _ = send(socket, ApiStatus::Ok, json!(name), &extra).await;
            Ok(())
        }
        other => anyhow::bail!("{other} not found."),
    }
}

/// Run a pipeline, streaming progress. The first OK carries the new
/// pipeline id; the final END repeats it.
async fn start(
    socket: &mut WebSocket,
    ctx: &Arc<ServerContext>,
    work: Value,
    extra: &Map<String, Value>,
) -> anyhow::Result<()> {
    let work = work
        .as_str()
        .context("START request must be a pipeline directory")?;
    let work_path = ctx.root_path.join(work);
    let loaded = read_pipeline_config(
        &work_path,
        &ctx.root_path,
        Some(&ctx.data_path),
        None,
        None,
    )?;
    let pipe_id = loaded.context.pipe_id.clone();
    let revision = current_revision(&ctx.root_path);
    let job_name = work_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| work.to_string());

    let _ = send(socket, ApiStatus::Ok, json!(pipe_id), extra).await;

    let manager: Arc<dyn TaskManager> = ctx.manager.clone();
    let executor = Executor::new(ctx.store.clone(), ctx.cache.clone(), manager);
    let (tx, mut rx) = mpsc::channel(100);
    let tasks = loaded.tasks;
    let run_id = pipe_id.clone();
    let handle = tokio::spawn(async move {
        executor.run(&run_id, &job_name, revision, tasks, tx).await
    });

    while let Some(message) = rx.recv().await {
        // A closed client must not abort the pipeline; keep draining.
        if send(socket, ApiStatus::Ok, json!(message), extra).await.is_err() {
            continue;
        }
    }
    match handle.await {
        Ok(Ok(())) => {
            let _ = send(socket, ApiStatus::End, json!(pipe_id), extra).await;
        }
        Ok(Err(err)) => {
            let _ = send(socket, ApiStatus::Error, json!(err.to_string()), extra).await;
        }
        Err(err) => {
            let _ = send(
                socket,
                ApiStatus::Error,
                json!(format!("pipeline run failed: {err}")),
                extra,
            )
            .await;
        }
    }
    Ok(())
}

/// Serve a log snapshot, or follow the stream until it or the client ends.
async fn logs(
    socket: &mut WebSocket,
    ctx: &Arc<ServerContext>,
    work: Value,
    extra: &Map<String, Value>,
) -> anyhow::Result<()> {
    let options = work.as_object().context("LOGS request must be an object")?;
    let resource = options
        .get("resource")
        .and_then(Value::as_str)
        .context("LOGS request must name a resource")?;
    let follow = options.get("follow").and_then(Value::as_bool).unwrap_or(false);
    let lines = options.get("lines").and_then(Value::as_i64);
    let container = options
        .get("container")
        .and_then(Value::as_str)
        .map(str::to_string);

    if follow {
        let mut stream = ctx.manager.follow_logs(resource, container, lines).await?;
        while let Some(line) = stream.recv().await {
            if send(socket, ApiStatus::Ok, json!(line), extra).await.is_err() {
                // Client went away; dropping the receiver stops the worker.
                return Ok(());
            }
        }
    } else {
        let text = ctx.manager.get_logs(resource, container, lines).await?;
        let _ = send(socket, ApiStatus::Ok, json!(text), extra).await;
    }
    let _ = send(socket, ApiStatus::End, json!("LOGS"), extra).await;
    Ok(())
}
