// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Service layer error types.

Transport-agnostic errors that adapters map to HTTP status codes. The
`From` conversions keep the tracker and store error taxonomies out of the
HTTP surface.
*/

use thiserror::Error;

use airscout_store::StoreError;
use airscout_tracker::TrackerError;
use airscout_types::KeyError;

/// Service layer errors (transport-agnostic)
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    /// Resource not found (404 in HTTP)
    #[error("not found: {resource} '{id}'")]
    NotFound { resource: String, id: String },

    /// Invalid input parameters (400 in HTTP)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists (409 in HTTP)
    #[error("already exists: {resource} '{id}'")]
    AlreadyExists { resource: String, id: String },

    /// Durable storage failed (503 in HTTP; the in-memory mutation, if
    /// any, still applied)
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal service error (500 in HTTP)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<TrackerError> for ServiceError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(key) => ServiceError::NotFound {
                resource: "device".to_string(),
                id: key.to_string(),
            },
            TrackerError::Duplicate(key) => ServiceError::AlreadyExists {
                resource: "device".to_string(),
                id: key.to_string(),
            },
            TrackerError::InvalidKey(e) => ServiceError::InvalidInput(e.to_string()),
            TrackerError::PhyUnknown(name) => ServiceError::NotFound {
                resource: "phy".to_string(),
                id: name,
            },
            TrackerError::DuplicatePhyName(name) => ServiceError::AlreadyExists {
                resource: "phy".to_string(),
                id: name,
            },
            TrackerError::StoreFailure(msg) => ServiceError::Storage(msg),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::Storage(err.to_string())
    }
}

impl From<KeyError> for ServiceError {
    fn from(err: KeyError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}
