use leadflow_core::auth::AuthError;
use leadflow_core::backend::BackendError;
use leadflow_core::config::ConfigError;
use leadflow_core::leads::LeadError;
use leadflow_core::store::StoreError;
use leadflow_core::users::UserError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error("FlexiLogger::{:?}: {}", .0, .0)]
    FlexiLogger(#[from] flexi_logger::FlexiLoggerError),

    #[error("Config: {}", .0)]
    Config(#[from] ConfigError),

    #[error("Local store: {}", .0)]
    Store(#[from] StoreError),

    #[error("{}", .0)]
    Auth(#[from] AuthError),

    #[error("{}", .0)]
    Backend(#[from] BackendError),

    #[error("{}", .0)]
    Lead(#[from] LeadError),

    #[error("{}", .0)]
    User(#[from] UserError),
}
