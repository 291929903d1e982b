//! Error types and error codes for Farol
//!
//! This module defines:
//! - `FarolError`: application-specific error enum
//! - `ErrorCode`: structured error codes for API responses

use serde::{Deserialize, Serialize};

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum FarolError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("{message}")]
    Api { code: i32, message: String },
}

impl FarolError {
    /// Build an error carrying one of the structured error codes.
    pub fn api(code: ErrorCode<'_>) -> Self {
        FarolError::Api {
            code: code.code,
            message: code.message.to_string(),
        }
    }

    /// The API error code associated with this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            FarolError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Error code structure for API responses
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const PARAMETER_MISSING: ErrorCode<'static> = ErrorCode {
    code: 10000,
    message: "parameter missing",
};

pub const TENANT_PARAM_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20001,
    message: "'tenant' parameter error",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

pub const RESOURCE_CONFLICT: ErrorCode<'static> = ErrorCode {
    code: 20005,
    message: "resource conflict",
};

pub const INVALID_DATA_ID: ErrorCode<'static> = ErrorCode {
    code: 20008,
    message: "invalid dataId",
};

pub const CONFIG_GRAY_OVER_MAX_VERSION_COUNT: ErrorCode<'static> = ErrorCode {
    code: 20010,
    message: "config gray version over max count",
};

pub const CONFIG_GRAY_RULE_FORMAT_INVALID: ErrorCode<'static> = ErrorCode {
    code: 20011,
    message: "config gray rule format invalid",
};

pub const OVER_MAX_SIZE: ErrorCode<'static> = ErrorCode {
    code: 5034,
    message: "config content size is over limit",
};

pub const SERVICE_NAME_ERROR: ErrorCode<'static> = ErrorCode {
    code: 21000,
    message: "service name error",
};

pub const WEIGHT_ERROR: ErrorCode<'static> = ErrorCode {
    code: 21001,
    message: "weight error",
};

pub const INSTANCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 21003,
    message: "instance not found",
};

pub const SERVICE_NOT_EXIST: ErrorCode<'static> = ErrorCode {
    code: 21008,
    message: "service not exist",
};

pub const ILLEGAL_NAMESPACE: ErrorCode<'static> = ErrorCode {
    code: 22000,
    message: "illegal namespace",
};

pub const ILLEGAL_STATE: ErrorCode<'static> = ErrorCode {
    code: 23000,
    message: "illegal state",
};

pub const SERVER_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "server error",
};

pub const FUZZY_WATCH_PATTERN_OVER_LIMIT: ErrorCode<'static> = ErrorCode {
    code: 50310,
    message: "fuzzy watch pattern over limit",
};

pub const FUZZY_WATCH_PATTERN_MATCH_COUNT_OVER_LIMIT: ErrorCode<'static> = ErrorCode {
    code: 50311,
    message: "fuzzy watch pattern matched count over limit",
};
