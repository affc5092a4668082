//! In-process implementations of the session, lock, rate-limit, tenant and
//! conversation-log collaborators. Suitable for single-process deployments
//! and tests.

mod conversation_log;
mod rate_limit;
mod session_lock;
mod session_store;
mod tenants;

pub use conversation_log::{DEFAULT_CONVERSATION_LOG_CAPACITY, InMemoryConversationLog};
pub use rate_limit::FixedWindowRateLimiter;
pub use session_lock::InMemorySessionLock;
pub use session_store::InMemorySessionStore;
pub use tenants::InMemoryTenantDirectory;
