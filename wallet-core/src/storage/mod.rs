pub mod embedded_key;
pub mod paths;
pub mod secure_store;

pub use embedded_key::{EmbeddedKeyStore, EMBEDDED_KEY_SLOT};
pub use paths::WalletPaths;
pub use secure_store::{FileSecureStorage, MemorySecureStorage, SecureStorage};
