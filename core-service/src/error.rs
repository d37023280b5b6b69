use crate::envelope::ErrorReply;
use crate::translate::{translate, UNKNOWN_ERROR};

use core_engine::EngineError;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Could not find argument `{name}` of type {type_name}")]
    ArgumentNotFound {
        name: String,
        type_name: &'static str,
    },

    #[error("Instance `{instance_id}` is not initialized")]
    NotInitialized { instance_id: String },

    #[error("Method is not recognized")]
    MethodNotRecognized { method: String },

    /// A ratchet operation ran before create, join or get for that peer.
    #[error("Ratchet channel with `{peer}` was not created, joined or fetched in this instance")]
    ChannelNotFound { peer: String },

    #[error("Card of `{identity}` was not found")]
    UserNotFound { identity: String },

    #[error("Initialization of `{instance_id}` was cancelled")]
    Cancelled { instance_id: String },

    /// A worker task panicked or was torn down.
    #[error("Worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ServiceError {
    pub fn argument(name: impl Into<String>, type_name: &'static str) -> Self {
        ServiceError::ArgumentNotFound {
            name: name.into(),
            type_name,
        }
    }

    pub fn code(&self) -> String {
        match self {
            ServiceError::ArgumentNotFound { .. } => "argument_not_found".to_string(),
            ServiceError::NotInitialized { .. } => "not_initialized".to_string(),
            ServiceError::MethodNotRecognized { .. } => "method_not_recognized".to_string(),
            ServiceError::ChannelNotFound { .. } => "ratchet_channel_not_found".to_string(),
            ServiceError::UserNotFound { .. } => "user_not_found".to_string(),
            ServiceError::Cancelled { .. } => "initialization_cancelled".to_string(),
            ServiceError::Worker(_) => UNKNOWN_ERROR.to_string(),
            ServiceError::Engine(error) => translate(error).code,
        }
    }

    pub fn to_reply(&self) -> ErrorReply {
        match self {
            ServiceError::Engine(error) => translate(error),
            ServiceError::MethodNotRecognized { method } => ErrorReply::new(self.code(), self.to_string())
                .with_details(Value::String(format!("Method name: '{}'", method))),
            _ => ErrorReply::new(self.code(), self.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
