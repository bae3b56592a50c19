use crate::worlds::World;
use std::collections::HashSet;

/// A value to be installed as a global inside matching contexts.
///
/// Functions cross the boundary as literal source text, re-evaluated inside
/// the target context. Captured closures and external references are not
/// preserved - only what the source text itself names.
#[derive(Debug, Clone)]
pub enum InjectedValue {
    Value(serde_json::Value),
    Function { source: String },
}

/// User-registered instrumentation replayed into every newly created
/// context whose world matches, for the lifetime of the driver. Survives
/// page reloads by design: replay is driven by context creation, not by
/// registration time.
#[derive(Debug, Clone)]
pub struct Injector {
    pub worlds: HashSet<World>,
    globals: Vec<(String, InjectedValue)>,
}

impl Injector {
    pub fn new(worlds: impl IntoIterator<Item = World>) -> Self {
        Self {
            worlds: worlds.into_iter().collect(),
            globals: Vec::new(),
        }
    }

    pub fn set_value(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.globals.push((name.into(), InjectedValue::Value(value)));
        self
    }

    pub fn set_function(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.globals.push((
            name.into(),
            InjectedValue::Function {
                source: source.into(),
            },
        ));
        self
    }

    pub fn applies_to(&self, world: World) -> bool {
        self.worlds.contains(&world)
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    /// Build the expression evaluated inside a target context to apply all
    /// globals. Each key is assigned inside its own try/catch so one bad
    /// payload cannot block the rest, and re-running the script is a no-op
    /// beyond reassignment.
    pub fn apply_script(&self) -> String {
        let mut script = String::from("(() => {\n");
        for (name, value) in &self.globals {
            let key = serde_json::to_string(name).unwrap_or_else(|_| format!("{:?}", name));
            let rhs = match value {
                InjectedValue::Value(v) => v.to_string(),
                InjectedValue::Function { source } => format!("({})", source),
            };
            script.push_str(&format!(
                "  try {{ globalThis[{}] = {}; }} catch (e) {{}}\n",
                key, rhs
            ));
        }
        script.push_str("})()");
        script
    }
}
