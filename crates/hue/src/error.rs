use thiserror::Error;

#[derive(Error, Debug)]
pub enum HueError {
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error("Invalid v1 resource reference: {0:?}")]
    InvalidIdV1(String),

    #[error("Bridge error {typ} at {address}: {description}")]
    BridgeError {
        typ: u32,
        address: String,
        description: String,
    },
}

pub type HueResult<T> = Result<T, HueError>;
