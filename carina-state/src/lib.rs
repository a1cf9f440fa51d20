//! Carina State Management
//!
//! Persists what `apply` created so later runs can refresh, diff and
//! destroy it.
//!
//! - **StateFile**: serial, lineage and one [`ResourceState`] per managed resource
//! - **StateBackend**: storage plus locking; [`LocalBackend`] keeps both on disk
//! - **LockInfo**: who holds the state and until when
//!
//! ```ignore
//! let backend = create_backend(&BackendConfig::default())?;
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... apply changes ...
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
