// Copyright 2026 Spilljoin Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the join engine
//!
//! Every failure in this subsystem is fatal to the join in progress:
//! there are no internal retries. Spilling to disk is a planned fallback
//! taken on memory pressure, never an error-recovery path. The host
//! decides whether to re-issue the whole statement.

use thiserror::Error;

/// Result type alias for join engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the hash-join engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Input errors
    // =========================================================================
    /// Failure reading the build or probe input
    #[error("input error on {side} side: {message}")]
    Input { side: &'static str, message: String },

    // =========================================================================
    // Resource errors
    // =========================================================================
    /// Row buffer or hash table growth failed
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Memory budget exhausted and spill to disk is disabled
    #[error("memory budget of {budget} bytes exhausted and spilling is disabled")]
    ResourceExhausted { budget: usize },

    // =========================================================================
    // Storage errors
    // =========================================================================
    /// Chunk file create/write/read/seek failure
    #[error("chunk file I/O error: {message}")]
    StorageIo { message: String },

    // =========================================================================
    // Row reference errors
    // =========================================================================
    /// A captured row reference could no longer be resolved by its source
    #[error("row reference is stale and cannot be resolved")]
    ReferenceStale,

    // =========================================================================
    // Control flow
    // =========================================================================
    /// Cooperative abort requested by the host; not a failure
    #[error("join cancelled")]
    Cancelled,

    /// Internal error for unexpected conditions
    #[error("{message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new build-side input error
    pub fn build_input(message: impl Into<String>) -> Self {
        Error::Input {
            side: "build",
            message: message.into(),
        }
    }

    /// Create a new probe-side input error
    pub fn probe_input(message: impl Into<String>) -> Self {
        Error::Input {
            side: "probe",
            message: message.into(),
        }
    }

    /// Create a new StorageIo error
    pub fn storage_io(message: impl Into<String>) -> Self {
        Error::StorageIo {
            message: message.into(),
        }
    }

    /// Create a new Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Check if this error was caused by host cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check if this is a resource/allocation failure
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Error::Allocation(_) | Error::ResourceExhausted { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageIo {
            message: err.to_string(),
        }
    }
}
