use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("paste meta validation did not pass: {message}")]
    MetaUnprocessable { message: String },
    #[error("paste meta version `{version}` is not supported")]
    MetaVersionInvalid { version: u32 },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn meta_unprocessable(message: impl Into<String>) -> Self {
        Self::MetaUnprocessable {
            message: message.into(),
        }
    }
}
