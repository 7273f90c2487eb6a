pub mod coordinator;
pub mod diff;
pub mod document;
pub mod manager;
pub mod model;
pub mod state;

pub use coordinator::{DebouncedSave, SaveCoordinator, SaveOutcome, SaveStatus};
pub use diff::{diff, ChangeSet};
pub use manager::SettingsManager;
pub use model::{Settings, CATEGORIES};
pub use state::SettingsState;
