//! Process lifecycle control and multi-world debug-session multiplexing.
//!
//! The driver sits between "I have a command to start the app" and "I have a
//! live, introspectable handle to its UI": it allocates a debugging port,
//! spawns the app detached, races endpoint discovery against early death,
//! resolves the real leaf binary out of the helper-process tree, classifies
//! every JavaScript execution context into a logical world, and replays
//! registered instrumentation into contexts as they appear and disappear.

pub mod discovery;
pub mod driver;
pub mod inject;
pub mod ipc_trace;
pub mod launcher;
pub mod picker;
pub mod pidtree;
pub mod port;
pub mod race;
pub mod session;
pub mod terminate;
pub mod worlds;

pub use discovery::discover_endpoint;
pub use driver::{AppDriver, DriverConfig};
pub use inject::{InjectedValue, Injector};
pub use launcher::{AppLauncher, LaunchedProcess, ProcessState};
pub use picker::{PageHints, PickedWindow};
pub use port::allocate_port;
pub use session::SessionMux;
pub use terminate::{terminate_tree, TerminateOpts};
pub use worlds::{ContextMeta, ExecutionContext, SessionKind, World, WorldRegistry};

pub use kestrel_core::{Error, Result};
