// Authentication module
// Token persistence, single-flight refresh and session operations

mod refresh;
mod service;
mod session;
mod store;
mod types;

pub use refresh::RefreshCoordinator;
pub use service::AuthService;
pub use session::{HttpSessionAuthority, SessionAuthority, REFRESH_ENDPOINT};
pub use store::{MemoryTokenStore, SqliteTokenStore, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use types::{Credentials, SessionResponse, TokenPair};
