use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("{domain} domain is missing required columns: {}", .fields.join(", "))]
    MissingField {
        domain: String,
        fields: Vec<String>,
    },

    #[error("Subject {subject} has no dosing records; relative time origin is undefined")]
    NoDosingRecords { subject: String },

    #[error("Data parsing error: {0}")]
    ParseError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Insufficient data points for calculation: {0}")]
    InsufficientData(String),
}
