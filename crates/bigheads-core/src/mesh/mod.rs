//! Envelope assembly, flood/forward, fragmentation, and handshake
//! orchestration — the core of a BigHeads node.

mod engine;
mod envelope;
mod frame;
mod search;

pub use engine::{Event, MeshEngine, MeshEngineConfig};
pub use envelope::{EncMode, Envelope};
pub use frame::{Frame, FragmentAssembler};
pub use search::ExportFormat;
