pub mod setting;

pub use setting::{SettingEntry, SettingRow, StoredSettings, ValueKind};
