//! Security access algorithm (external collaborator): a thread-safe
//! `seed -> key` callable used by the UDS `SecurityAccess` exchange. The
//! original system loads this from a platform DLL; the core only needs the
//! callable to be thread-safe (design §6).

use std::sync::Arc;

use crate::error::SecurityAccessError;

pub type SecurityAlgorithm = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, SecurityAccessError> + Send + Sync>;

/// An algorithm that always fails, for configurations/tests with no write
/// DIDs configured (security access is only exercised on a write path).
pub fn unimplemented_algorithm() -> SecurityAlgorithm {
    Arc::new(|_seed| Err(SecurityAccessError::AlgorithmFailed("no security algorithm configured".into())))
}
