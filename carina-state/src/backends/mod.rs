//! Backend implementations for state storage

mod local;

pub use local::LocalBackend;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};

/// Backend named by the manifest `backend` block
pub fn create_backend(config: &BackendConfig) -> BackendResult<Box<dyn StateBackend>> {
    match config.backend_type.as_str() {
        "local" => Ok(Box::new(LocalBackend::from_config(config)?)),
        other => Err(BackendError::UnsupportedBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_local_is_known() {
        assert!(create_backend(&BackendConfig::default()).is_ok());

        let config = BackendConfig {
            backend_type: "s3".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_backend(&config),
            Err(BackendError::UnsupportedBackend(name)) if name == "s3"
        ));
    }
}
