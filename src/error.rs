use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] serde_json::Error),

    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("File exists: {0}")]
    Exists(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Cross-device link: {0}")]
    CrossDevice(String),

    #[error("Too many levels of symbolic links: {0}")]
    SymlinkLoop(String),

    #[error("Name too long: {0}")]
    NameTooLong(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bad file descriptor: {0}")]
    BadDescriptor(usize),

    #[error("No such device: major {0}")]
    NoDevice(i16),

    #[error("No free {0} available")]
    Exhausted(&'static str),

    #[error("File too large")]
    FileTooLarge,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FsError>;
