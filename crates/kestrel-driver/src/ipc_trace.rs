use serde::{Deserialize, Serialize};

/// Prefix the tracer puts on console lines carrying a serialized record.
/// The session pump strips and decodes these instead of logging them as
/// ordinary console output.
pub const TRACE_PREFIX: &str = "@@kestrel-ipc@@";

/// Tracer installed into the preload world when IPC tracing is enabled.
///
/// Wraps the bridge's send/invoke/on surface so every inter-process call,
/// response, and event is recorded with direction, kind, channel, duration,
/// and error. Records surface two ways: a flush-on-demand global
/// (`__kestrelIpcFlush`) and prefixed console lines decoded by
/// [`decode_trace_line`]. Installing twice is a no-op.
pub const TRACER_SOURCE: &str = r#"(() => {
  if (globalThis.__kestrelIpcFlush) { return; }
  const records = [];
  const push = (rec) => {
    records.push(rec);
    try { console.debug('@@kestrel-ipc@@ ' + JSON.stringify(rec)); } catch (e) {}
  };
  globalThis.__kestrelIpcFlush = () => records.splice(0, records.length);
  const ipc = globalThis.electron && globalThis.electron.ipcRenderer
    ? globalThis.electron.ipcRenderer
    : (typeof require === 'function' ? (() => {
        try { return require('electron').ipcRenderer; } catch (e) { return null; }
      })() : null);
  if (!ipc) { return; }
  const origSend = ipc.send.bind(ipc);
  ipc.send = (channel, ...args) => {
    push({ direction: 'out', kind: 'send', channel: String(channel) });
    return origSend(channel, ...args);
  };
  const origInvoke = ipc.invoke.bind(ipc);
  ipc.invoke = async (channel, ...args) => {
    const start = Date.now();
    try {
      const result = await origInvoke(channel, ...args);
      push({ direction: 'out', kind: 'invoke', channel: String(channel), durationMs: Date.now() - start });
      return result;
    } catch (err) {
      push({ direction: 'out', kind: 'invoke', channel: String(channel), durationMs: Date.now() - start, error: String(err) });
      throw err;
    }
  };
  const origOn = ipc.on.bind(ipc);
  ipc.on = (channel, listener) => {
    const wrapped = (event, ...args) => {
      push({ direction: 'in', kind: 'event', channel: String(channel) });
      return listener(event, ...args);
    };
    return origOn(channel, wrapped);
  };
})()"#;

/// One decoded inter-process call trace record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpcRecord {
    pub direction: String,
    pub kind: String,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Decode a console line if it carries a tracer record.
pub fn decode_trace_line(line: &str) -> Option<IpcRecord> {
    let rest = line.trim().strip_prefix(TRACE_PREFIX)?;
    serde_json::from_str(rest.trim()).ok()
}
