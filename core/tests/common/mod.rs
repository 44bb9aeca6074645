#![allow(dead_code)]

use async_trait::async_trait;
use mesh_inspect_core::catalog::{ToolCall, ToolCandidate};
use mesh_inspect_core::error::{ResolverError, ToolExecutionError};
use mesh_inspect_core::executor::{Execution, ExecutionContext, GeometryToolExecutor, ToolExecutor};
use mesh_inspect_core::notify::BroadcastNotifier;
use mesh_inspect_core::resolver::{IntentResolver, ResolveRequest, RuleBasedResolver};
use mesh_inspect_core::session::SessionState;
use mesh_inspect_core::{
    CommandDispatcher, CommandId, CommandRequest, MeshLoader, MeshModel, ModelFormat, ModelLoader, SessionId,
    SessionStateStore, StateVersion, ToolCatalog,
};
use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

const CUBE_VERTICES: &str = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nv 0 0 1\nv 1 0 1\nv 1 1 1\nv 0 1 1\n";

// outward-facing quads: -z, +z, -y, +y, -x, +x
const CUBE_FACES: [&str; 6] = [
    "f 1 4 3 2",
    "f 5 6 7 8",
    "f 1 2 6 5",
    "f 4 8 7 3",
    "f 1 5 8 4",
    "f 2 3 7 6",
];

fn load_obj(name: &str, obj: &str) -> MeshModel {
    MeshLoader.load(name, obj.as_bytes(), ModelFormat::Obj).unwrap()
}

pub fn cube() -> MeshModel {
    load_obj("cube.obj", &format!("{CUBE_VERTICES}{}\n", CUBE_FACES.join("\n")))
}

/// Unit cube without its top face: four open edges.
pub fn open_cube() -> MeshModel {
    let faces: Vec<&str> = CUBE_FACES
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .map(|(_, f)| *f)
        .collect();
    load_obj("open_cube.obj", &format!("{CUBE_VERTICES}{}\n", faces.join("\n")))
}

/// 30 mm square plate of 5 mm cells with a ~7 mm and a ~12 mm hole.
pub fn plate() -> MeshModel {
    let cells = 6;
    let removed = [(1, 1), (3, 3), (3, 4), (4, 3), (4, 4)];
    let mut obj = String::new();
    for j in 0..=cells {
        for i in 0..=cells {
            let _ = writeln!(obj, "v {} {} 0", i * 5, j * 5);
        }
    }
    let vertex = |i: usize, j: usize| j * (cells + 1) + i + 1;
    for i in 0..cells {
        for j in 0..cells {
            if removed.contains(&(i, j)) {
                continue;
            }
            let _ = writeln!(
                obj,
                "f {} {} {} {}",
                vertex(i, j),
                vertex(i + 1, j),
                vertex(i + 1, j + 1),
                vertex(i, j + 1)
            );
        }
    }
    load_obj("plate.obj", &obj)
}

pub fn request(id: &str, session: SessionId, base: StateVersion, text: &str) -> CommandRequest {
    CommandRequest {
        command_id: CommandId::new(id),
        session_id: session,
        base_state_version: base,
        text: text.to_string(),
    }
}

/// Geometry executor that counts runs and can park one command after its
/// tool has finished, until the test releases it.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: AtomicUsize,
    held: Mutex<Option<(CommandId, mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl RecordingExecutor {
    /// Returns (finished, release): `finished` fires once `command` has
    /// executed; sending on `release` lets it continue to the gate.
    pub fn hold(&self, command: &str) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (finished_tx, finished_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.held.lock().unwrap() = Some((CommandId::new(command), finished_tx, release_rx));
        (finished_rx, release_tx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ToolExecutor for RecordingExecutor {
    fn execute(
        &self,
        call: &ToolCall,
        snapshot: &SessionState,
        ctx: &ExecutionContext,
    ) -> Result<Execution, ToolExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = GeometryToolExecutor.execute(call, snapshot, ctx);
        let parked = {
            let mut held = self.held.lock().unwrap();
            match held.as_ref() {
                Some((id, _, _)) if *id == ctx.command_id => held.take(),
                _ => None,
            }
        };
        if let Some((_, finished, release)) = parked {
            finished.send(()).unwrap();
            release.recv().unwrap();
        }
        result
    }
}

/// Resolver that always answers with the same candidate.
pub struct FixedResolver(pub ToolCandidate);

#[async_trait]
impl IntentResolver for FixedResolver {
    async fn resolve(&self, _request: &ResolveRequest) -> Result<ToolCandidate, ResolverError> {
        Ok(self.0.clone())
    }
}

pub struct Harness {
    pub dispatcher: Arc<CommandDispatcher>,
    pub executor: Arc<RecordingExecutor>,
    pub notifier: Arc<BroadcastNotifier>,
}

pub fn harness_with(configure: impl FnOnce(CommandDispatcher) -> CommandDispatcher) -> Harness {
    let executor = Arc::new(RecordingExecutor::default());
    let notifier = Arc::new(BroadcastNotifier::default());
    let resolver = Arc::new(RuleBasedResolver::new(ToolCatalog::new().names()).unwrap());
    let dispatcher = CommandDispatcher::new(Arc::new(SessionStateStore::new()), resolver, notifier.clone())
        .with_executor(executor.clone());
    Harness {
        dispatcher: Arc::new(configure(dispatcher)),
        executor,
        notifier,
    }
}

pub fn harness() -> Harness {
    harness_with(|d| d)
}
