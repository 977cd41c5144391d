//! ID generator port for run identifiers and throwaway credentials.

/// Generates unique identifiers.
///
/// Used for per-run work directories and the per-run object store
/// credential pair, so tests can substitute a predictable sequence.
pub trait IdGenerator: Send + Sync {
    /// Short identifier naming one orchestration run.
    fn run_id(&self) -> String;

    /// Random token suitable as an access or secret key.
    fn secret(&self) -> String;
}
