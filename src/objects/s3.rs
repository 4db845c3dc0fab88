use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::TimeZone;
use chrono::Utc;
use futures::stream::StreamExt;
use futures::stream::TryStreamExt;
use http::{StatusCode, Uri};
use serde::Deserialize;

use super::{Key, ObjectBody, ObjectEntry, ObjectMeta, ObjectStore, Part};
use crate::errors::{Error, Result};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_BUCKET: &str = "uploads";

#[derive(Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub bucket_name: String,
}

impl S3Config {
    /// Read connection settings from the environment. `S3_ENDPOINT`,
    /// `S3_ACCESS_KEY` and `S3_SECRET_KEY` are required; region and bucket
    /// have defaults.
    pub fn from_env() -> Result<S3Config> {
        Ok(S3Config {
            endpoint: require_env("S3_ENDPOINT")?,
            access_key: require_env("S3_ACCESS_KEY")?,
            secret_key: require_env("S3_SECRET_KEY")?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            bucket_name: std::env::var("S3_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
        })
    }

    pub async fn new_objects(&self) -> Result<S3> {
        let scp = SharedCredentialsProvider::new(
            Credentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
                None,
                None,
                "depot",
            )
            .provide_credentials()
            .await?,
        );

        let uri: Uri = self.endpoint.parse()?;

        let sdk_config = aws_config::load_from_env().await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .endpoint_url(uri.to_string())
            .force_path_style(true)
            .build();

        let s3_client = aws_sdk_s3::Client::from_conf(config);

        Ok(S3 {
            bucket_name: self.bucket_name.clone(),
            client: s3_client,
        })
    }
}

fn require_env(name: &'static str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::MissingEnvVar(name))
}

#[derive(Clone)]
pub struct S3 {
    bucket_name: String,
    client: Client,
}

#[async_trait]
impl ObjectStore for S3 {
    async fn ensure_bucket(&self) -> Result<()> {
        match self
            .client
            .head_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Ok(_) => return Ok(()),
            Err(SdkError::ServiceError(e)) => {
                let http = e.raw();
                if http.status() != StatusCode::NOT_FOUND {
                    return Err(SdkError::ServiceError(e).into());
                }
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!("bucket '{}' not found, creating it", self.bucket_name);
        self.client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }

    async fn initiate_multipart(&self, key: &Key, content_type: &str) -> Result<String> {
        let create_multipart_upload_output = self
            .client
            .create_multipart_upload()
            .key(key.as_str())
            .content_type(content_type)
            .bucket(&self.bucket_name)
            .send()
            .await?;

        let upload_id = create_multipart_upload_output
            .upload_id
            .ok_or(Error::StoreUnavailable("missing multipart upload id"))?;

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &Key,
        upload_id: &str,
        part_number: i32,
        bytes: Bytes,
    ) -> Result<Part> {
        let content_length = bytes.len() as i64;
        let upload_part_output = self
            .client
            .upload_part()
            .upload_id(upload_id)
            .part_number(part_number)
            .key(key.as_str())
            .body(ByteStream::from(bytes))
            .content_length(content_length)
            .bucket(&self.bucket_name)
            .send()
            .await?;

        Ok(Part {
            e_tag: upload_part_output.e_tag,
            part_number,
        })
    }

    async fn complete_multipart(
        &self,
        key: &Key,
        upload_id: &str,
        parts: Vec<Part>,
    ) -> Result<()> {
        let mut mpu = CompletedMultipartUpload::builder();
        for part in parts {
            let mut pb = CompletedPart::builder();
            if let Some(e_tag) = &part.e_tag {
                pb = pb.e_tag(e_tag);
            }
            mpu = mpu.parts(pb.part_number(part.part_number).build());
        }
        let _complete_multipart_upload_output = self
            .client
            .complete_multipart_upload()
            .multipart_upload(mpu.build())
            .upload_id(upload_id)
            .key(key.as_str())
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &Key, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .upload_id(upload_id)
            .key(key.as_str())
            .bucket(&self.bucket_name)
            .send()
            .await?;
        Ok(())
    }

    async fn head(&self, key: &Key) -> Result<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .key(key.as_str())
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectMeta {
                size: output.content_length() as u64,
                content_type: output.content_type().map(String::from),
            })),
            Err(SdkError::ServiceError(e)) => {
                let http = e.raw();
                match http.status() {
                    StatusCode::NOT_FOUND => Ok(None),
                    _ => Err(SdkError::ServiceError(e).into()),
                }
            }
            Err(e) => Err(Error::AWSSDKHeadObjectError(e)),
        }
    }

    async fn get(&self, key: &Key) -> Result<ObjectBody> {
        let get_object_output = self
            .client
            .get_object()
            .key(key.as_str())
            .bucket(&self.bucket_name)
            .send()
            .await?;

        Ok(get_object_output.body.map_err(|e| e.into()).boxed())
    }

    async fn get_range(&self, key: &Key, start: u64, end: u64) -> Result<ObjectBody> {
        let get_object_output = self
            .client
            .get_object()
            .key(key.as_str())
            .range(format!("bytes={}-{}", start, end))
            .bucket(&self.bucket_name)
            .send()
            .await?;

        Ok(get_object_output.body.map_err(|e| e.into()).boxed())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let output = request.send().await?;

            for object in output.contents().unwrap_or_default() {
                let Some(key) = object.key() else { continue };
                entries.push(ObjectEntry {
                    key: key.to_string(),
                    size: object.size() as u64,
                    last_modified: object.last_modified().and_then(|dt| {
                        Utc.timestamp_opt(dt.secs(), dt.subsec_nanos()).single()
                    }),
                });
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(entries)
    }
}
