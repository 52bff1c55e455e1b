//! Persisted state: the per-device passcode cache.

pub mod passcodes;

pub use passcodes::{MemoryPasscodeStore, PasscodeStore, StorageError, TomlPasscodeStore};
