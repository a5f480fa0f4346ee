// Authentication module
// Session lifecycle, persistence and the gateway's auth endpoints

mod types;
mod storage;
mod manager;
mod refresh;
mod login;
mod validate;

pub use login::{login, user_type_for_email};
pub use manager::SessionManager;
pub use refresh::refresh_session;
pub use storage::{MemorySessionStorage, SessionStorage, SqliteSessionStorage, SESSION_KEY};
pub use types::{token_preview, Session, TokenData, UserIdentity, UserType};
pub use validate::{validate_token, Validation};
