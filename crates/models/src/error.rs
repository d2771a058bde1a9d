use loam_orm::PoolError;

/// Registration-time error type.
///
/// Every variant aborts registration synchronously; nothing here is deferred
/// to request time.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid model name: '{name}'")]
    InvalidName { name: String },

    #[error("Server model name already exists: '{name}'")]
    DuplicateName { name: String },

    #[error("Model '{name}' is not a valid model definition: {message}")]
    InvalidModel { name: String, message: String },

    #[error("Invalid model descriptor: {message}")]
    InvalidDescriptor { message: String },

    #[error("Invalid model options: {message}")]
    InvalidOptions { message: String },

    #[error("Database resolution failed: {0}")]
    Database(#[from] PoolError),
}
