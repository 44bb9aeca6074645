pub mod budget;
pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod gate;
pub mod geometry;
pub mod ids;
pub mod mesh;
pub mod notify;
pub mod resolver;
pub mod session;
pub mod topo;
pub mod units;

pub use catalog::{ToolCandidate, ToolCatalog, ToolKind};
pub use dispatch::{CommandDispatcher, CommandRequest, DispatcherConfig, ServerMessage};
pub use ids::{CommandId, SessionId, StateVersion};
pub use mesh::{MeshLoader, MeshModel, ModelFormat, ModelLoader};
pub use session::SessionStateStore;

pub fn version() -> &'static str {
    "0.1.0"
}
