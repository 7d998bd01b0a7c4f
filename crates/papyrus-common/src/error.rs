//! Error types for Papyrus
//!
//! This module defines:
//! - `PapyrusError`: Application-specific error enum
//! - `AppError`: Wrapper for integration with calling layers

use std::fmt::{Display, Formatter};

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum PapyrusError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("lock conflict: {0}")]
    LockConflict(String),
}

/// Wrapper for application errors
#[derive(Debug)]
pub struct AppError {
    inner: anyhow::Error,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError { inner: value }
    }
}

impl AppError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}
