use crate::inject::Injector;
use crate::ipc_trace;
use crate::worlds::{ContextMeta, SessionKind, World, WorldRegistry};
use chromiumoxide::cdp::browser_protocol::log as cdp_log;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventLoadingFailed, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EnableParams as PageEnableParams, EventFrameNavigated,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    EnableParams as RuntimeEnableParams, EvaluateParams, EventConsoleApiCalled,
    EventExceptionThrown, EventExecutionContextCreated, EventExecutionContextDestroyed,
    EventExecutionContextsCleared, ExecutionContextId,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use kestrel_core::{Error, LogEntry, LogLevel, LogPipeline, LogSource, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// One low-level debug session bound to one open page/window.
///
/// Enables the runtime/log/page/network domains, classifies every execution
/// context the page reports into a world, replays registered injectors into
/// matching contexts as they appear, and normalizes console, exception, and
/// network-failure events into the log pipeline. Torn down on detach/drop;
/// the registry and injector list live and die with one driver instance.
pub struct SessionMux {
    page: Page,
    registry: Arc<Mutex<WorldRegistry>>,
    injectors: Arc<Mutex<Vec<Injector>>>,
    ipc_tracing: Arc<std::sync::atomic::AtomicBool>,
    reload_tx: broadcast::Sender<()>,
    pump: JoinHandle<()>,
}

/// Apply-scripts for every registered injector matching `world`, in
/// registration order.
pub fn replay_scripts(injectors: &[Injector], world: World) -> Vec<String> {
    injectors
        .iter()
        .filter(|inj| inj.applies_to(world) && !inj.is_empty())
        .map(|inj| inj.apply_script())
        .collect()
}

/// Printable form of one console argument from its protocol fields.
pub fn format_arg_value(value: Option<&serde_json::Value>, description: Option<&str>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => description.unwrap_or("<object>").to_string(),
    }
}

async fn evaluate_in_context(page: &Page, context_id: i64, expression: &str) -> Result<()> {
    let params = EvaluateParams::builder()
        .expression(expression)
        .context_id(ExecutionContextId::new(context_id))
        .build()
        .map_err(Error::internal)?;
    page.execute(params)
        .await
        .map_err(|e| Error::Cdp(e.to_string()))?;
    Ok(())
}

impl SessionMux {
    /// Attach to `page`: enable domains, wire event streams, start the pump.
    pub async fn attach(
        page: Page,
        kind: SessionKind,
        pipeline: Arc<LogPipeline>,
        injectors: Arc<Mutex<Vec<Injector>>>,
        ipc_tracing: bool,
    ) -> Result<Self> {
        page.execute(RuntimeEnableParams::default())
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        page.execute(cdp_log::EnableParams::default())
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        page.execute(PageEnableParams::default())
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        page.execute(NetworkEnableParams::default())
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;

        let mut ctx_created = page
            .event_listener::<EventExecutionContextCreated>()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        let mut ctx_destroyed = page
            .event_listener::<EventExecutionContextDestroyed>()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        let mut ctx_cleared = page
            .event_listener::<EventExecutionContextsCleared>()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        let mut console_events = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        let mut exception_events = page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        let mut log_events = page
            .event_listener::<cdp_log::EventEntryAdded>()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        let mut nav_events = page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        let mut failed_events = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;
        let mut response_events = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| Error::Cdp(e.to_string()))?;

        let registry = Arc::new(Mutex::new(WorldRegistry::new()));
        let ipc_flag = Arc::new(std::sync::atomic::AtomicBool::new(ipc_tracing));
        let (reload_tx, _) = broadcast::channel(16);

        let pump = {
            let page = page.clone();
            let registry = registry.clone();
            let injectors = injectors.clone();
            let pipeline = pipeline.clone();
            let ipc_flag = ipc_flag.clone();
            let reload_tx = reload_tx.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(event) = ctx_created.next() => {
                            let desc = &event.context;
                            let aux = desc.aux_data.clone().unwrap_or_default();
                            let meta = ContextMeta {
                                id: *desc.id.inner(),
                                name: desc.name.clone(),
                                origin: desc.origin.clone(),
                                aux_type: aux.get("type").and_then(|v| v.as_str()).map(String::from),
                                is_default: aux.get("isDefault").and_then(|v| v.as_bool()).unwrap_or(false),
                                frame_id: aux.get("frameId").and_then(|v| v.as_str()).map(String::from),
                                session: kind,
                            };

                            let ctx = registry.lock().unwrap().observe_created(&meta);
                            tracing::debug!(id = ctx.id, world = ctx.world.as_str(), "context created");

                            // Injector replay happens before any other event for
                            // this context is processed, so injected globals are
                            // in place by the caller's first evaluate.
                            let scripts = replay_scripts(&injectors.lock().unwrap(), ctx.world);
                            for script in scripts {
                                if let Err(e) = evaluate_in_context(&page, ctx.id, &script).await {
                                    tracing::debug!(id = ctx.id, "injector replay failed: {}", e);
                                }
                            }

                            if ctx.world == World::Preload
                                && ipc_flag.load(std::sync::atomic::Ordering::SeqCst)
                            {
                                if let Err(e) =
                                    evaluate_in_context(&page, ctx.id, ipc_trace::TRACER_SOURCE).await
                                {
                                    tracing::debug!(id = ctx.id, "tracer install failed: {}", e);
                                }
                            }
                        }
                        Some(event) = ctx_destroyed.next() => {
                            registry
                                .lock()
                                .unwrap()
                                .observe_destroyed(*event.execution_context_id.inner());
                        }
                        Some(_) = ctx_cleared.next() => {
                            registry.lock().unwrap().clear();
                        }
                        Some(event) = console_events.next() => {
                            let world = registry
                                .lock()
                                .unwrap()
                                .world_of(*event.execution_context_id.inner());
                            let message = event
                                .args
                                .iter()
                                .map(|arg| format_arg_value(arg.value.as_ref(), arg.description.as_deref()))
                                .collect::<Vec<_>>()
                                .join(" ");

                            if let Some(record) = ipc_trace::decode_trace_line(&message) {
                                let meta = serde_json::to_value(&record).ok();
                                let level = if record.error.is_some() {
                                    LogLevel::Error
                                } else {
                                    LogLevel::Debug
                                };
                                let mut entry = LogEntry::new(
                                    LogSource::Ipc,
                                    level,
                                    format!("{} {} {}", record.direction, record.kind, record.channel),
                                );
                                entry.meta = meta;
                                pipeline.push(entry);
                            } else {
                                let level = console_level(&event.r#type);
                                pipeline.push(
                                    LogEntry::new(world.log_source(), level, message)
                                        .with_meta(serde_json::json!({"world": world.as_str()})),
                                );
                            }
                        }
                        Some(event) = exception_events.next() => {
                            let details = &event.exception_details;
                            let world = registry
                                .lock()
                                .unwrap()
                                .world_of(details.execution_context_id.as_ref().map(|id| *id.inner()).unwrap_or(0));
                            let description = details
                                .exception
                                .as_ref()
                                .and_then(|obj| obj.description.clone())
                                .unwrap_or_else(|| details.text.clone());
                            pipeline.push(
                                LogEntry::new(world.log_source(), LogLevel::Error, description)
                                    .with_meta(serde_json::json!({
                                        "world": world.as_str(),
                                        "lineNumber": details.line_number,
                                        "url": details.url,
                                    })),
                            );
                        }
                        Some(event) = log_events.next() => {
                            let entry = &event.entry;
                            let level = match entry.level {
                                cdp_log::LogEntryLevel::Error => LogLevel::Error,
                                cdp_log::LogEntryLevel::Warning => LogLevel::Warn,
                                cdp_log::LogEntryLevel::Verbose => LogLevel::Debug,
                                _ => LogLevel::Info,
                            };
                            pipeline.push(
                                LogEntry::new(LogSource::System, level, entry.text.clone())
                                    .with_meta(serde_json::json!({
                                        "logSource": serde_json::to_value(&entry.source).ok(),
                                    })),
                            );
                        }
                        Some(event) = nav_events.next() => {
                            if event.frame.parent_id.is_none() {
                                tracing::debug!(url = %event.frame.url, "main frame navigated");
                                let _ = reload_tx.send(());
                            }
                        }
                        Some(event) = failed_events.next() => {
                            pipeline.push(
                                LogEntry::new(
                                    LogSource::Network,
                                    LogLevel::Error,
                                    format!("request failed: {}", event.error_text),
                                )
                                .with_meta(serde_json::json!({
                                    "requestId": event.request_id.inner(),
                                    "canceled": event.canceled,
                                })),
                            );
                        }
                        Some(event) = response_events.next() => {
                            let status = event.response.status;
                            if status >= 400 {
                                pipeline.push(
                                    LogEntry::new(
                                        LogSource::Network,
                                        LogLevel::Warn,
                                        format!("HTTP {} {}", status, event.response.url),
                                    )
                                    .with_meta(serde_json::json!({
                                        "status": status,
                                        "statusText": event.response.status_text,
                                    })),
                                );
                            }
                        }
                        else => break,
                    }
                }
            })
        };

        Ok(Self {
            page,
            registry,
            injectors,
            ipc_tracing: ipc_flag,
            reload_tx,
            pump,
        })
    }

    /// Notified on every main-frame navigation (page reload).
    pub fn subscribe_reload(&self) -> broadcast::Receiver<()> {
        self.reload_tx.subscribe()
    }

    pub fn registry(&self) -> Arc<Mutex<WorldRegistry>> {
        self.registry.clone()
    }

    /// Turn IPC call tracing on, installing the tracer into the current
    /// preload context immediately when one exists. New preload contexts get
    /// it from the pump.
    pub async fn enable_ipc_tracing(&self) -> Result<()> {
        self.ipc_tracing
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let current = self
            .registry
            .lock()
            .unwrap()
            .current(World::Preload)
            .map(|ctx| ctx.id);
        if let Some(id) = current {
            evaluate_in_context(&self.page, id, ipc_trace::TRACER_SOURCE).await?;
        }
        Ok(())
    }

    /// Evaluate an expression in the most recent context of `world`.
    pub async fn evaluate_in_world(&self, world: World, expression: &str) -> Result<()> {
        let current = self
            .registry
            .lock()
            .unwrap()
            .current(world)
            .map(|ctx| ctx.id);
        match current {
            Some(id) => evaluate_in_context(&self.page, id, expression).await,
            None => Err(Error::NoPage {
                hint: format!("no live {} context", world.as_str()),
            }),
        }
    }

    /// Re-apply all matching injectors into the current context of each of
    /// their worlds. Used after registering an injector when matching
    /// contexts already exist.
    pub async fn replay_now(&self) -> Result<()> {
        let work: Vec<(i64, String)> = {
            let registry = self.registry.lock().unwrap();
            let injectors = self.injectors.lock().unwrap();
            injectors
                .iter()
                .filter(|inj| !inj.is_empty())
                .flat_map(|inj| {
                    inj.worlds
                        .iter()
                        .filter_map(|world| registry.current(*world).map(|ctx| (ctx.id, inj.apply_script())))
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        for (id, script) in work {
            if let Err(e) = evaluate_in_context(&self.page, id, &script).await {
                tracing::debug!(id, "injector replay failed: {}", e);
            }
        }
        Ok(())
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn detach(&self) {
        self.pump.abort();
    }
}

impl Drop for SessionMux {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn console_level(
    kind: &chromiumoxide::cdp::js_protocol::runtime::ConsoleApiCalledType,
) -> LogLevel {
    use chromiumoxide::cdp::js_protocol::runtime::ConsoleApiCalledType as T;
    match kind {
        T::Error | T::Assert => LogLevel::Error,
        T::Warning => LogLevel::Warn,
        T::Debug | T::Trace => LogLevel::Debug,
        _ => LogLevel::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worlds::WorldRegistry;

    #[test]
    fn test_injector_registered_before_context_is_replayed() {
        // Register for the renderer world while no renderer context exists.
        let injectors = vec![Injector::new([World::Renderer])
            .set_value("__probe", serde_json::json!("visible"))];

        // No renderer context yet: nothing to replay into preload/worker.
        assert!(replay_scripts(&injectors, World::Preload).is_empty());

        // A renderer context appears; the replay set for its world carries
        // the registered global without further action.
        let mut registry = WorldRegistry::new();
        let ctx = registry.observe_created(&ContextMeta {
            id: 7,
            name: String::new(),
            origin: "app://x".into(),
            aux_type: Some("default".into()),
            is_default: true,
            frame_id: None,
            session: SessionKind::Page,
        });
        let scripts = replay_scripts(&injectors, ctx.world);
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("__probe"));
        assert!(scripts[0].contains("\"visible\""));
    }

    #[test]
    fn test_replay_skips_empty_and_mismatched_injectors() {
        let injectors = vec![
            Injector::new([World::Preload]),
            Injector::new([World::Worker]).set_value("w", serde_json::json!(1)),
        ];
        assert!(replay_scripts(&injectors, World::Preload).is_empty());
        assert!(replay_scripts(&injectors, World::Renderer).is_empty());
        assert_eq!(replay_scripts(&injectors, World::Worker).len(), 1);
    }

    #[test]
    fn test_format_arg_value() {
        assert_eq!(
            format_arg_value(Some(&serde_json::json!("plain")), None),
            "plain"
        );
        assert_eq!(
            format_arg_value(Some(&serde_json::json!({"a": 1})), None),
            "{\"a\":1}"
        );
        assert_eq!(format_arg_value(None, Some("Error: boom")), "Error: boom");
        assert_eq!(format_arg_value(None, None), "<object>");
    }

    #[test]
    fn test_console_level_mapping() {
        use chromiumoxide::cdp::js_protocol::runtime::ConsoleApiCalledType as T;
        assert_eq!(console_level(&T::Error), LogLevel::Error);
        assert_eq!(console_level(&T::Warning), LogLevel::Warn);
        assert_eq!(console_level(&T::Debug), LogLevel::Debug);
        assert_eq!(console_level(&T::Log), LogLevel::Info);
    }
}
