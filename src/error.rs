use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockPrintError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
    #[error("malformed template for {field}: \"{template}\": {reason}")]
    MalformedTemplate {
        field: String,
        template: String,
        reason: String,
    },
    #[error("unresolved parameter '{name}' in template \"{template}\"")]
    UnresolvedParameter { name: String, template: String },
    #[error("{field}: \"{value}\" is not a number")]
    NotNumeric { field: String, value: String },
    #[error("transcoding failed: {0}")]
    Transcode(String),
    #[error("resource error: {0}")]
    Resource(String),
    #[error("fragment cannot fit on the page: {0}")]
    UnplaceableFragment(String),
    #[error("placeholder {0} was never placed by the flow pass")]
    UnplacedPlaceholder(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Evaluation,
    Transcoding,
    Resource,
    Layout,
}

impl BlockPrintError {
    pub fn invalid_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        BlockPrintError::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockPrintError::InvalidValue { .. } | BlockPrintError::MalformedTemplate { .. } => {
                ErrorKind::Configuration
            }
            BlockPrintError::UnresolvedParameter { .. } | BlockPrintError::NotNumeric { .. } => {
                ErrorKind::Evaluation
            }
            BlockPrintError::Transcode(_) => ErrorKind::Transcoding,
            BlockPrintError::Resource(_) | BlockPrintError::Io(_) => ErrorKind::Resource,
            BlockPrintError::UnplaceableFragment(_) | BlockPrintError::UnplacedPlaceholder(_) => {
                ErrorKind::Layout
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BlockPrintError>;
