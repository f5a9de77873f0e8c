pub mod api_keys;
pub mod app;
pub mod commands;
pub mod guard;
pub mod indicators;
pub mod instances;
pub mod state;
pub mod strategies;
pub mod symbols;

pub use api_keys::KeyPrompt;
pub use app::Dashboard;
pub use commands::{Command, CommandOutcome};
pub use strategies::{StrategyEdit, StrategyView};
