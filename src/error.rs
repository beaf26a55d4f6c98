use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::xml;

#[derive(Debug, Clone)]
pub enum SqsError {
    QueueAlreadyExists(String),
    QueueDoesNotExist(String),
    InvalidAttributeName(String),
    InvalidAttributeValue(String),
    InvalidParameterValue(String),
    MissingParameter(String),
    ReceiptHandleIsInvalid(String),
    MessageTooLong(String),
    BatchEntryIdsNotDistinct(String),
    EmptyBatchRequest(String),
    TooManyEntriesInBatchRequest(String),
    InvalidBatchEntryId(String),
    InvalidAction(String),
    Internal(String),
}

impl SqsError {
    pub fn error_code(&self) -> &str {
        match self {
            SqsError::QueueAlreadyExists(_) => "QueueAlreadyExists",
            SqsError::QueueDoesNotExist(_) => "AWS.SimpleQueueService.NonExistentQueue",
            SqsError::InvalidAttributeName(_) => "InvalidAttributeName",
            SqsError::InvalidAttributeValue(_) => "InvalidAttributeValue",
            SqsError::InvalidParameterValue(_) => "InvalidParameterValue",
            SqsError::MissingParameter(_) => "MissingParameter",
            SqsError::ReceiptHandleIsInvalid(_) => "ReceiptHandleIsInvalid",
            SqsError::MessageTooLong(_) => "MessageTooLong",
            SqsError::BatchEntryIdsNotDistinct(_) => "AWS.SimpleQueueService.BatchEntryIdsNotDistinct",
            SqsError::EmptyBatchRequest(_) => "AWS.SimpleQueueService.EmptyBatchRequest",
            SqsError::TooManyEntriesInBatchRequest(_) => {
                "AWS.SimpleQueueService.TooManyEntriesInBatchRequest"
            }
            SqsError::InvalidBatchEntryId(_) => "AWS.SimpleQueueService.InvalidBatchEntryId",
            SqsError::InvalidAction(_) => "InvalidAction",
            SqsError::Internal(_) => "InternalError",
        }
    }

    /// Short code for batch result entries, without the AWS namespace prefix.
    pub fn batch_code(&self) -> &str {
        match self {
            SqsError::QueueDoesNotExist(_) => "QueueDoesNotExist",
            SqsError::BatchEntryIdsNotDistinct(_) => "BatchEntryIdsNotDistinct",
            SqsError::EmptyBatchRequest(_) => "EmptyBatchRequest",
            SqsError::TooManyEntriesInBatchRequest(_) => "TooManyEntriesInBatchRequest",
            SqsError::InvalidBatchEntryId(_) => "InvalidBatchEntryId",
            other => other.error_code(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            SqsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn sender_fault(&self) -> bool {
        !matches!(self, SqsError::Internal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            SqsError::QueueAlreadyExists(m)
            | SqsError::QueueDoesNotExist(m)
            | SqsError::InvalidAttributeName(m)
            | SqsError::InvalidAttributeValue(m)
            | SqsError::InvalidParameterValue(m)
            | SqsError::MissingParameter(m)
            | SqsError::ReceiptHandleIsInvalid(m)
            | SqsError::MessageTooLong(m)
            | SqsError::BatchEntryIdsNotDistinct(m)
            | SqsError::EmptyBatchRequest(m)
            | SqsError::TooManyEntriesInBatchRequest(m)
            | SqsError::InvalidBatchEntryId(m)
            | SqsError::InvalidAction(m)
            | SqsError::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for SqsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for SqsError {}

impl IntoResponse for SqsError {
    fn into_response(self) -> Response {
        let body = xml::format_error(self.error_code(), self.message(), self.sender_fault());
        (
            self.status_code(),
            [("content-type", "text/xml")],
            body,
        )
            .into_response()
    }
}
