pub mod compression;
pub mod error;
pub mod memory;
pub mod testing;

pub mod prelude {
    pub use crate::compression::{HttpRemoteCompressor, Message, RemoteCompressor, Role};
    pub use crate::error::Result;
    pub use crate::memory::{
        FileStateStore, InMemoryStateStore, ItemUpdate, MemoryItem, MessageSource, PersistedState,
        Settings, SettingsUpdate, StateStore, VaultEntry, WorkingMemoryEngine,
    };
}
