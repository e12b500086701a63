//! Field-level encryption of personal data inside events.
//!
//! Every owner gets one AES-256-GCM key. Fields named in the
//! [`PersonalDataSchema`] are encrypted independently before an event is
//! appended and decrypted after it is loaded. Deleting the owner's key makes
//! those fields permanently unreadable while the event rows stay in the log
//! (crypto-shredding).

pub mod cipher;
pub mod field;
pub mod key;
pub mod schema;

pub use cipher::EncryptedField;
pub use field::FieldEncryptor;
pub use key::{EncryptionKey, KeyManager, KeyRing};
pub use schema::PersonalDataSchema;
