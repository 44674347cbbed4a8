// Authentication module
// Credential storage, raw auth endpoint calls, and session notifications

mod credentials;
mod refresh;
mod session;
mod types;

pub use credentials::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use refresh::{endpoint_url, login, refresh_credentials, LOGIN_PATH, ME_PATH, REFRESH_PATH};
pub use session::{ChannelObserver, SessionEvents, SessionInvalidated, SessionObserver};
pub use types::{token_preview, CredentialPair, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
