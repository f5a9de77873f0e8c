use std::path::PathBuf;

use super::strategies::EditPhase;
use crate::types::{EntityId, Indicator, Side};

/// A user action bound to a concrete entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SelectApiKey(EntityId),
    RemoveApiKey(EntityId),
    CreateInstance { name: String },
    CommitInstance { strategy_id: EntityId, name: String },
    StartInstance { instance_id: EntityId, strategy_id: EntityId },
    StopInstance(EntityId),
    RemoveInstance(EntityId),
    ExportInstance(EntityId),
    ToggleEdit(EntityId),
    SaveStrategy(EntityId),
    StartStrategy(EntityId),
    StopStrategy(EntityId),
    RemoveStrategy(EntityId),
    OpenIndicators { strategy_id: EntityId, side: Side },
    SaveIndicators { strategy_id: EntityId, side: Side },
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Command::SelectApiKey(_) => "select",
            Command::RemoveApiKey(_) => "remove key",
            Command::CreateInstance { .. } => "create",
            Command::CommitInstance { .. } => "commit",
            Command::StartInstance { .. } => "start instance",
            Command::StopInstance(_) => "stop instance",
            Command::RemoveInstance(_) => "remove instance",
            Command::ExportInstance(_) => "export",
            Command::ToggleEdit(_) => "edit",
            Command::SaveStrategy(_) => "save",
            Command::StartStrategy(_) => "start",
            Command::StopStrategy(_) => "stop",
            Command::RemoveStrategy(_) => "remove",
            Command::OpenIndicators { side: Side::Buy, .. } => "buy indicators",
            Command::OpenIndicators { side: Side::Sell, .. } => "sell indicators",
            Command::SaveIndicators { .. } => "save indicators",
        }
    }

    /// Whether the command may change backend state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Command::SelectApiKey(_)
                | Command::CreateInstance { .. }
                | Command::OpenIndicators { .. }
                | Command::ExportInstance(_)
        )
    }
}

/// What a dispatched command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Done,
    /// A draft instance and its strategy were created.
    Drafted { instance_id: EntityId, strategy_id: EntityId },
    InstanceSaved(EntityId),
    Exported(PathBuf),
    Phase(EditPhase),
    Indicators(Vec<Indicator>),
}
