use kestrel_core::LogSource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A logical JavaScript execution domain, distinguished by privilege and
/// isolation rather than by the raw protocol context id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum World {
    /// Host/main-process (node-like) context.
    Main,
    /// Privileged bridge context between host and page.
    Preload,
    /// Ordinary page content.
    Renderer,
    /// User-created isolated content worlds.
    Isolated,
    Worker,
    Unknown,
}

impl World {
    pub fn as_str(&self) -> &'static str {
        match self {
            World::Main => "main",
            World::Preload => "preload",
            World::Renderer => "renderer",
            World::Isolated => "isolated",
            World::Worker => "worker",
            World::Unknown => "unknown",
        }
    }

    pub fn log_source(&self) -> LogSource {
        match self {
            World::Main => LogSource::Main,
            World::Preload => LogSource::Preload,
            World::Renderer => LogSource::Renderer,
            World::Isolated => LogSource::Isolated,
            World::Worker => LogSource::Worker,
            World::Unknown => LogSource::System,
        }
    }
}

/// What kind of target the owning debug session is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Page,
    Worker,
    /// Node-like main-process target.
    Node,
}

/// Metadata the protocol reports for a newly created execution context.
///
/// Mirrors the fields of the context description (name, aux data, frame)
/// plus the session kind, so classification is a pure function over this
/// struct and testable without a live app.
#[derive(Debug, Clone)]
pub struct ContextMeta {
    pub id: i64,
    pub name: String,
    pub origin: String,
    /// `type` field of the context's aux data ("default"/"isolated"/"worker").
    pub aux_type: Option<String>,
    pub is_default: bool,
    pub frame_id: Option<String>,
    pub session: SessionKind,
}

/// One classified execution context.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub id: i64,
    pub world: World,
    pub frame_id: Option<String>,
}

// Context names announcing the privileged bridge.
const BRIDGE_MARKERS: &[&str] = &["electron isolated context", "preload", "bridge"];

// Utility worlds the automation tooling creates for itself; never the bridge.
const UTILITY_MARKERS: &[&str] = &["__puppeteer_utility_world__", "utility", "devtools"];

fn name_matches(name: &str, markers: &[&str]) -> bool {
    let lower = name.to_ascii_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

/// Classify a new context into a world.
///
/// Ordered rules over the reported metadata; `preload_seen` is whether a
/// preload world has already been observed on this page. The protocol never
/// labels the bridge context explicitly, so rule 3 exploits creation order:
/// the first isolated context on a page is almost always the privileged
/// bridge, created before any user isolated worlds exist. Best-effort by
/// design - a renamed bridge or an early user world can misclassify.
pub fn classify(meta: &ContextMeta, preload_seen: bool) -> World {
    let aux = meta.aux_type.as_deref();

    // 1. Session kind is authoritative where the protocol does label things.
    if meta.session == SessionKind::Worker || aux == Some("worker") {
        return World::Worker;
    }
    if meta.session == SessionKind::Node {
        return World::Main;
    }

    // 2. Named bridge contexts.
    if name_matches(&meta.name, BRIDGE_MARKERS) {
        return World::Preload;
    }

    // 3. First isolated context ~= the bridge, unless it is tooling-internal.
    if !preload_seen && aux == Some("isolated") && !name_matches(&meta.name, UTILITY_MARKERS) {
        return World::Preload;
    }

    // 4. Page content.
    if meta.is_default || aux == Some("default") || meta.name == "main" {
        return World::Renderer;
    }

    // 5. Everything else.
    if aux == Some("isolated") {
        World::Isolated
    } else {
        World::Unknown
    }
}

/// Per-page registry of live contexts, rebuilt incrementally from context
/// lifecycle events. Scoped to the life of one page attachment.
#[derive(Debug, Default)]
pub struct WorldRegistry {
    contexts: HashMap<i64, ExecutionContext>,
    /// Insertion order, for "apply to the most recent context of a world".
    order: Vec<i64>,
    preload_seen: bool,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and record a newly created context.
    ///
    /// Many contexts can map to the same world concurrently (reloads tear
    /// old contexts down lazily); the registry keeps them all and only
    /// promises recency for [`WorldRegistry::current`].
    pub fn observe_created(&mut self, meta: &ContextMeta) -> ExecutionContext {
        let world = classify(meta, self.preload_seen);
        if world == World::Preload {
            self.preload_seen = true;
        }
        let ctx = ExecutionContext {
            id: meta.id,
            world,
            frame_id: meta.frame_id.clone(),
        };
        self.contexts.insert(meta.id, ctx.clone());
        self.order.retain(|id| *id != meta.id);
        self.order.push(meta.id);
        ctx
    }

    pub fn observe_destroyed(&mut self, id: i64) {
        self.contexts.remove(&id);
        self.order.retain(|existing| *existing != id);
    }

    /// Drop all contexts (page navigated away, contexts cleared event).
    pub fn clear(&mut self) {
        self.contexts.clear();
        self.order.clear();
    }

    pub fn get(&self, id: i64) -> Option<&ExecutionContext> {
        self.contexts.get(&id)
    }

    /// Most recently created context of `world`.
    pub fn current(&self, world: World) -> Option<&ExecutionContext> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.contexts.get(id))
            .find(|ctx| ctx.world == world)
    }

    pub fn world_of(&self, id: i64) -> World {
        self.contexts.get(&id).map(|c| c.world).unwrap_or(World::Unknown)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
