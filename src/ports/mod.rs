//! Port traits defining external boundaries.
//!
//! Each trait represents a boundary between the orchestration core and an
//! external system (filesystem, git, processes, object store, IDs).
//! Implementations live in `src/adapters/`.

pub mod filesystem;
pub mod git;
pub mod id_gen;
pub mod object_store;
pub mod shell;

pub use filesystem::FileSystem;
pub use git::GitRepo;
pub use id_gen::IdGenerator;
pub use object_store::ObjectStore;
pub use shell::{CommandLine, ExitOutcome, ShellExecutor};
