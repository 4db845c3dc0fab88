//! The `/stream` handler and its `Range` header parsing.

use axum::body::StreamBody;
use axum::extract::{Query, State, TypedHeader};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use headers::{Header, HeaderName};
use serde::Deserialize;

use super::AppState;
use crate::errors::{Error, Result};
use crate::streaming::RangeSpec;

/// A single `Range: bytes=a-b` header; `b` may be omitted for an open-ended
/// range. Multi-range requests are not supported and fail to decode, which
/// axum's `Option<TypedHeader<_>>` treats as an absent header (the whole
/// object is served).
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

static RANGE_NAME: HeaderName = HeaderName::from_static("range");

impl Header for ByteRange {
    fn name() -> &'static HeaderName {
        &RANGE_NAME
    }

    fn decode<'i, I>(values: &mut I) -> std::result::Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        let interval = s.strip_prefix("bytes=").ok_or_else(headers::Error::invalid)?;
        let (start, end) = interval.split_once('-').ok_or_else(headers::Error::invalid)?;

        let start = start.parse::<u64>().map_err(|_| headers::Error::invalid())?;
        let end = match end {
            "" => None,
            end => Some(end.parse::<u64>().map_err(|_| headers::Error::invalid())?),
        };

        Ok(ByteRange { start, end })
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        };
        let value = HeaderValue::from_str(&value).expect("range header values are valid ascii");
        values.extend(std::iter::once(value))
    }
}

#[derive(Deserialize)]
pub(crate) struct StreamQuery {
    token: Option<String>,
}

pub(crate) async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    range: Option<TypedHeader<ByteRange>>,
) -> Result<Response> {
    let token = query.token.ok_or(Error::TokenMissing)?;
    let range = range.map(|TypedHeader(range)| RangeSpec {
        start: range.start,
        end: range.end,
    });

    let reply = state.streaming.stream(&token, range).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&reply.content_type)?,
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("inline; filename=\"{}\"", reply.filename))?,
    );

    match reply.range {
        Some((start, end)) => {
            headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, reply.size))?,
            );
            headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from_str(&(end - start + 1).to_string())?,
            );
            Ok((
                StatusCode::PARTIAL_CONTENT,
                headers,
                StreamBody::new(reply.body),
            )
                .into_response())
        }
        None => {
            headers.insert(
                header::CONTENT_LENGTH,
                HeaderValue::from_str(&reply.size.to_string())?,
            );
            Ok((StatusCode::OK, headers, StreamBody::new(reply.body)).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn decode(value: &str) -> std::result::Result<ByteRange, headers::Error> {
        let value = HeaderValue::from_str(value).unwrap();
        ByteRange::decode(&mut std::iter::once(&value))
    }

    #[rstest]
    #[case("bytes=0-1023", 0, Some(1023))]
    #[case("bytes=1024-", 1024, None)]
    #[case("bytes=0-0", 0, Some(0))]
    fn decodes_single_ranges(#[case] value: &str, #[case] start: u64, #[case] end: Option<u64>) {
        assert_eq!(decode(value).unwrap(), ByteRange { start, end });
    }

    #[rstest]
    #[case("0-1023")] // missing unit
    #[case("bytes=-500")] // suffix ranges unsupported
    #[case("bytes=abc-def")]
    #[case("bytes=0-10,20-30")] // multi-range unsupported
    #[case("bytes=")]
    fn rejects_malformed_ranges(#[case] value: &str) {
        assert!(decode(value).is_err());
    }

    #[test]
    fn encodes_both_forms() {
        let mut values = Vec::new();
        ByteRange {
            start: 5,
            end: Some(9),
        }
        .encode(&mut values);
        ByteRange {
            start: 10,
            end: None,
        }
        .encode(&mut values);
        assert_eq!(values[0], HeaderValue::from_static("bytes=5-9"));
        assert_eq!(values[1], HeaderValue::from_static("bytes=10-"));
    }
}
