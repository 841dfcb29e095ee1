//! Power supply (external collaborator): the core turns a project's supply
//! on once at startup and off once at shutdown, never in between (design §6).

use crate::error::PowerSupplyError;

pub trait PowerSupply: Send + Sync {
    fn set_output(&self, on: bool, project_name: &str) -> Result<bool, PowerSupplyError>;
}

/// No-op supply for configurations/tests with no physical power stage.
pub struct NullPowerSupply;

impl PowerSupply for NullPowerSupply {
    fn set_output(&self, on: bool, _project_name: &str) -> Result<bool, PowerSupplyError> {
        Ok(on)
    }
}
