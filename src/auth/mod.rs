pub mod storage;
pub mod store;

pub use storage::{
    CredentialStorage, MemoryCredentialStorage, SqliteCredentialStorage, CREDENTIAL_KEY,
};
pub use store::CredentialStore;
