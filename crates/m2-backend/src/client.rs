use std::future::Future;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, Method};
use crate::error::BackendError;

/// Mime type voice memos are uploaded with.
pub const VOICE_MEMO_MIME: &str = "audio/x-m4a";

/// The backend as the providers see it: `(endpoint) -> JSON`.
pub trait Backend: Send + Sync {
    /// Sends the endpoint's request. A successful response whose body is empty
    /// or not JSON yields `Value::Bool(true)`.
    fn request(&self, endpoint: Endpoint) -> BoxFuture<'_, Result<Value, BackendError>>;

    /// Posts `data` as the multipart `file` part.
    fn upload(
        &self,
        endpoint: Endpoint,
        file_name: String,
        data: Bytes,
    ) -> BoxFuture<'_, Result<(), BackendError>>;

    fn download(&self, endpoint: Endpoint) -> BoxFuture<'_, Result<Bytes, BackendError>>;
}

/// Typed helpers over [`Backend::request`].
pub trait BackendExt: Backend {
    fn fetch<T>(
        &self,
        endpoint: Endpoint,
    ) -> impl Future<Output = Result<T, BackendError>> + Send + '_
    where
        T: DeserializeOwned + Send + 'static,
    {
        async move {
            let path = endpoint.path();
            let value = self.request(endpoint).await?;
            serde_json::from_value(value).map_err(|source| BackendError::Decode { path, source })
        }
    }

    /// For endpoints that answer with a flag or nothing at all. Anything but
    /// an explicit `false` counts as success.
    fn fetch_flag(
        &self,
        endpoint: Endpoint,
    ) -> impl Future<Output = Result<bool, BackendError>> + Send + '_ {
        async move {
            let value = self.request(endpoint).await?;
            Ok(!matches!(value, Value::Bool(false)))
        }
    }
}

impl<B: Backend + ?Sized> BackendExt for B {}

fn interpret_body(body: &[u8]) -> Value {
    if body.trim_ascii().is_empty() {
        return Value::Bool(true);
    }
    serde_json::from_slice(body).unwrap_or(Value::Bool(true))
}

/// reqwest implementation of [`Backend`].
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    fn builder(&self, endpoint: &Endpoint) -> reqwest::RequestBuilder {
        let url = self.url(endpoint);
        let params = endpoint.params();
        let builder = match endpoint.method() {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        if endpoint.params_in_query() {
            builder.query(&params)
        } else {
            builder.form(&params)
        }
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        builder: reqwest::RequestBuilder,
    ) -> Result<Bytes, BackendError> {
        debug!("{} {}", endpoint.method().as_str(), endpoint.path());
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            warn!("{} answered {}", endpoint.path(), status);
            return Err(BackendError::Status {
                path: endpoint.path(),
                status: status.as_u16(),
            });
        }
        Ok(resp.bytes().await?)
    }
}

impl Backend for HttpBackend {
    fn request(&self, endpoint: Endpoint) -> BoxFuture<'_, Result<Value, BackendError>> {
        Box::pin(async move {
            let body = self.send(&endpoint, self.builder(&endpoint)).await?;
            Ok(interpret_body(&body))
        })
    }

    fn upload(
        &self,
        endpoint: Endpoint,
        file_name: String,
        data: Bytes,
    ) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            if endpoint.method() != Method::Post {
                return Err(BackendError::WrongMethod(endpoint.path(), "an upload"));
            }
            let size = data.len();
            let part = reqwest::multipart::Part::bytes(data.to_vec())
                .file_name(file_name)
                .mime_str(VOICE_MEMO_MIME)?;
            let form = reqwest::multipart::Form::new().part("file", part);
            let builder = self
                .client
                .post(self.url(&endpoint))
                .query(&endpoint.params())
                .multipart(form);
            self.send(&endpoint, builder).await?;
            debug!("Uploaded {} bytes to {}", size, endpoint.path());
            Ok(())
        })
    }

    fn download(&self, endpoint: Endpoint) -> BoxFuture<'_, Result<Bytes, BackendError>> {
        Box::pin(async move {
            if endpoint.method() != Method::Get {
                return Err(BackendError::WrongMethod(endpoint.path(), "a download"));
            }
            let body = self.send(&endpoint, self.builder(&endpoint)).await?;
            debug!("Downloaded {} bytes from {}", body.len(), endpoint.path());
            Ok(body)
        })
    }
}
