use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tokio_util::io::StreamReader;

use super::{ObjectReader, ObjectStore, ObjectStoreError, UploadSource};

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Resumable upload chunk size. GCS requires a multiple of 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 256 * 1024;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh tokens this many seconds before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Google Cloud Storage object store backend.
///
/// Uploads go through a resumable session and are streamed in fixed-size
/// chunks; the object only becomes visible once the final chunk lands.
pub struct GcsStore {
    bucket: String,
    endpoint: String,
    client: Client,
    credentials: Credentials,
    token: RwLock<Option<AccessToken>>,
    chunk_size: usize,
}

enum Credentials {
    ServiceAccount(ServiceAccountKey),
    MetadataServer,
    Static,
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: i64,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        chrono::Utc::now().timestamp() + TOKEN_REFRESH_MARGIN_SECS < self.expires_at
    }
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

impl GcsStore {
    /// Connect using ambient credentials: the service account key at
    /// `credentials_file` if given, otherwise the GCE metadata server.
    pub async fn new(
        bucket: &str,
        credentials_file: Option<&str>,
        endpoint: Option<&str>,
    ) -> Result<Self, anyhow::Error> {
        let credentials = match credentials_file {
            Some(path) => {
                let key_json = tokio::fs::read_to_string(path).await?;
                Credentials::ServiceAccount(serde_json::from_str(&key_json)?)
            }
            None => Credentials::MetadataServer,
        };

        let store = Self::build(bucket, endpoint, credentials, None)?;

        // Fail at startup rather than on the first request.
        store.refresh_token().await?;
        Ok(store)
    }

    /// Use a fixed bearer token, e.g. against a storage emulator.
    pub fn with_static_token(
        bucket: &str,
        endpoint: &str,
        token: &str,
    ) -> Result<Self, anyhow::Error> {
        let token = AccessToken {
            value: token.to_string(),
            expires_at: i64::MAX,
        };
        Self::build(bucket, Some(endpoint), Credentials::Static, Some(token))
    }

    /// Override the upload chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn build(
        bucket: &str,
        endpoint: Option<&str>,
        credentials: Credentials,
        token: Option<AccessToken>,
    ) -> Result<Self, anyhow::Error> {
        // Resumable uploads answer intermediate chunks with 308; never follow it.
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let endpoint = endpoint.unwrap_or(DEFAULT_ENDPOINT).to_string();
        Url::parse(&endpoint)?;

        Ok(Self {
            bucket: bucket.to_string(),
            endpoint,
            client,
            credentials,
            token: RwLock::new(token),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    async fn access_token(&self) -> Result<String, ObjectStoreError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh() {
                return Ok(token.value.clone());
            }
        }

        self.refresh_token()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("GCS authentication failed: {e}")))
    }

    async fn refresh_token(&self) -> Result<String, anyhow::Error> {
        let mut lock = self.token.write().await;
        if let Some(token) = lock.as_ref() {
            if token.is_fresh() {
                return Ok(token.value.clone());
            }
        }

        let resp = match &self.credentials {
            Credentials::ServiceAccount(key) => self.token_from_service_account(key).await?,
            Credentials::MetadataServer => self.token_from_metadata_server().await?,
            Credentials::Static => anyhow::bail!("static access token has no refresh source"),
        };

        let token = AccessToken {
            value: resp.access_token,
            expires_at: chrono::Utc::now().timestamp() + resp.expires_in,
        };
        let value = token.value.clone();
        *lock = Some(token);
        tracing::debug!("Refreshed GCS access token");
        Ok(value)
    }

    async fn token_from_service_account(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<TokenResponse, anyhow::Error> {
        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": "https://www.googleapis.com/auth/devstorage.read_write",
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        let header = base64_url_encode(&serde_json::to_vec(&serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        }))?);
        let payload = base64_url_encode(&serde_json::to_vec(&claims)?);
        let unsigned = format!("{header}.{payload}");

        let signature = sign_rs256(unsigned.as_bytes(), &key.private_key)?;
        let jwt = format!("{unsigned}.{}", base64_url_encode(&signature));

        let resp = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }

    async fn token_from_metadata_server(&self) -> Result<TokenResponse, anyhow::Error> {
        let resp = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ObjectStoreError> {
        let mut url = Url::parse(&self.endpoint).map_err(backend_error)?;
        url.path_segments_mut()
            .map_err(|_| ObjectStoreError::Backend(format!("invalid endpoint: {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, key: &str) -> Result<Url, ObjectStoreError> {
        self.url(&["storage", "v1", "b", &self.bucket, "o", key])
    }

    fn upload_url(&self) -> Result<Url, ObjectStoreError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut().append_pair("uploadType", "resumable");
        Ok(url)
    }

    /// Open a resumable upload session and return its URI.
    async fn start_upload(&self, key: &str, content_type: &str) -> Result<Url, ObjectStoreError> {
        let token = self.access_token().await?;
        let metadata = serde_json::json!({
            "name": key,
            "contentType": content_type,
            "contentDisposition": format!("attachment; filename=\"{key}\""),
        });

        let resp = self
            .client
            .post(self.upload_url()?)
            .bearer_auth(&token)
            .header("X-Upload-Content-Type", content_type)
            .json(&metadata)
            .send()
            .await
            .map_err(backend_error)?;

        let resp = check_status(resp, "GCS upload session").await?;
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ObjectStoreError::Backend("GCS upload session has no Location header".to_string())
            })?;

        Url::parse(location).map_err(backend_error)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn name(&self) -> &'static str {
        "gcs"
    }

    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: UploadSource<'_>,
    ) -> Result<(), ObjectStoreError> {
        let session = self.start_upload(key, content_type).await?;
        let mut offset: u64 = 0;

        loop {
            let mut chunk = Vec::with_capacity(self.chunk_size);
            (&mut *data)
                .take(self.chunk_size as u64)
                .read_to_end(&mut chunk)
                .await?;

            let len = chunk.len() as u64;
            let last = chunk.len() < self.chunk_size;
            let range = if len == 0 {
                format!("bytes */{offset}")
            } else if last {
                format!("bytes {}-{}/{}", offset, offset + len - 1, offset + len)
            } else {
                format!("bytes {}-{}/*", offset, offset + len - 1)
            };

            let resp = self
                .client
                .put(session.clone())
                .header(CONTENT_RANGE, range)
                .body(chunk)
                .send()
                .await
                .map_err(backend_error)?;

            if last {
                check_status(resp, "GCS upload").await?;
                break;
            }

            if resp.status() != StatusCode::PERMANENT_REDIRECT {
                let resp = check_status(resp, "GCS upload").await?;
                return Err(ObjectStoreError::Backend(format!(
                    "GCS finalized upload early with status {}",
                    resp.status()
                )));
            }

            offset += len;
            let persisted = persisted_bytes(&resp);
            if persisted != Some(offset) {
                return Err(ObjectStoreError::Backend(format!(
                    "GCS persisted {persisted:?} bytes, expected {offset}"
                )));
            }
        }

        tracing::debug!(key, content_type, bucket = %self.bucket, "Stored object in GCS");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ObjectReader, ObjectStoreError> {
        let token = self.access_token().await?;
        let mut url = self.object_url(key)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let resp = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(backend_error)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        let resp = check_status(resp, "GCS download").await?;

        let stream = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let token = self.access_token().await?;

        let resp = self
            .client
            .delete(self.object_url(key)?)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(backend_error)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        check_status(resp, "GCS delete").await?;

        Ok(())
    }
}

async fn check_status(resp: Response, what: &str) -> Result<Response, ObjectStoreError> {
    if resp.status().is_success() {
        return Ok(resp);
    }

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(ObjectStoreError::Backend(format!(
        "{what} failed ({status}): {body}"
    )))
}

/// Bytes committed so far, from the `Range: bytes=0-N` header of a 308 reply.
fn persisted_bytes(resp: &Response) -> Option<u64> {
    let Some(range) = resp.headers().get(RANGE) else {
        return Some(0);
    };
    let end = range.to_str().ok()?.strip_prefix("bytes=0-")?;
    end.parse::<u64>().ok().map(|end| end + 1)
}

fn backend_error(e: impl std::fmt::Display) -> ObjectStoreError {
    ObjectStoreError::Backend(e.to_string())
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn sign_rs256(data: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    use base64::Engine;

    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::engine::general_purpose::STANDARD.decode(der_b64.trim())?;

    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {e}"))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            data,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign: {e}"))?;

    Ok(signature)
}
