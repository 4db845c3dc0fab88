use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http error")]
    HTTPError(#[from] http::Error),
    #[error("http invalid header value")]
    HTTPInvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("invalid endpoint uri")]
    InvalidEndpointUri(#[from] http::uri::InvalidUri),

    #[error("{0}")]
    ByteStreamError(#[from] aws_sdk_s3::primitives::ByteStreamError),
    #[error("aws sdk credentials error")]
    AWSSDKCredentialsError(#[from] aws_credential_types::provider::error::CredentialsError),
    #[error("aws sdk head bucket error")]
    AWSSDKHeadBucketError(
        #[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_bucket::HeadBucketError>,
    ),
    #[error("aws sdk create bucket error")]
    AWSSDKCreateBucketError(
        #[from]
        aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::create_bucket::CreateBucketError>,
    ),
    #[error("aws sdk get object error")]
    AWSSDKGetObjectError(
        #[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>,
    ),
    #[error("aws sdk head object error")]
    AWSSDKHeadObjectError(
        #[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>,
    ),
    #[error("aws sdk list objects error")]
    AWSSDKListObjectsError(
        #[from]
        aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error>,
    ),
    #[error("aws sdk create multipart upload error")]
    AWSSDKCreateMultipartUploadError(
        #[from]
        aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadError,
        >,
    ),
    #[error("aws sdk upload part error")]
    AWSSDKUploadPartError(
        #[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::upload_part::UploadPartError>,
    ),
    #[error("aws sdk complete multipart upload error")]
    AWSSDKCompleteMultipartUploadError(
        #[from]
        aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadError,
        >,
    ),
    #[error("aws sdk abort multipart upload error")]
    AWSSDKAbortMultipartUploadError(
        #[from]
        aws_sdk_s3::error::SdkError<
            aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadError,
        >,
    ),

    #[error("object store unavailable: {0}")]
    StoreUnavailable(&'static str),

    #[error("missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("multipart form error")]
    MultipartFormError(#[from] axum::extract::multipart::MultipartError),

    // input validation errors
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("file size {0} exceeds the maximum allowed")]
    OversizeFile(u64),
    #[error("chunk size {0} is out of bounds")]
    InvalidChunkSize(u64),
    #[error("chunk index {index} out of range for {total} chunks")]
    InvalidChunkIndex { index: u32, total: u32 },
    #[error("key error: {0}")]
    KeyError(#[from] KeyError),

    // upload lifecycle errors
    #[error("unknown upload session: {0}")]
    InvalidSession(String),
    #[error("session is not owned by the caller")]
    OwnerMismatch,
    #[error("chunk {0} re-sent with a different hash")]
    HashMismatch(u32),
    #[error("upload incomplete: {received} of {total} chunks received")]
    UploadIncomplete { received: u32, total: u32 },

    // streaming errors
    #[error("missing streaming token")]
    TokenMissing,
    #[error("invalid or expired streaming token")]
    TokenInvalid,
    #[error("object not found")]
    ObjectNotFound,
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,
}

/// Error type used when validating object keys and the filenames that go
/// into them.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("owner id must not be empty")]
    EmptyOwner,
    #[error("owner id must not contain '/'")]
    SlashInOwner,
    #[error("filename must not be empty")]
    EmptyFilename,
    #[error("filename components must match regex: {0}")]
    FilenameMustMatchRegex(String),
    #[error("key must not be empty")]
    EmptyKey,
    #[error("key must not start with '/'")]
    RootedKey,
    #[error("key must not contain relative segments")]
    RelativeSegment,
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_)
            | Error::UnsupportedType(_)
            | Error::OversizeFile(_)
            | Error::InvalidChunkSize(_)
            | Error::InvalidChunkIndex { .. }
            | Error::InvalidSession(_)
            | Error::UploadIncomplete { .. }
            | Error::KeyError(_)
            | Error::MultipartFormError(_) => StatusCode::BAD_REQUEST,
            Error::TokenMissing => StatusCode::UNAUTHORIZED,
            Error::OwnerMismatch | Error::TokenInvalid => StatusCode::FORBIDDEN,
            Error::ObjectNotFound => StatusCode::NOT_FOUND,
            Error::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::warn!("{:?}", self);
                match self {
                    Error::HashMismatch(_) => format!("{}", self),
                    _ => String::from("object store unavailable"),
                }
            }
            _ => format!("{}", self),
        };
        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            Error::InvalidRequest("missing field").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::UnsupportedType("exe".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::TokenMissing.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::TokenInvalid.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::OwnerMismatch.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::ObjectNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::RangeNotSatisfiable.status_code(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
    }

    #[test]
    fn hash_mismatch_is_a_server_error() {
        assert_eq!(
            Error::HashMismatch(3).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
