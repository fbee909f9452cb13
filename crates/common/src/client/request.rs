use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use url::Url;

use super::ClientError;

/// A single part of a multipart upload
#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub data: Bytes,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Bytes::from(value.into()),
            file_name: None,
            content_type: None,
        }
    }

    pub fn file(
        name: impl Into<String>,
        data: Bytes,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data,
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
        }
    }

    fn to_part(&self) -> Result<Part, reqwest::Error> {
        // Bytes clones are refcounted; the length keeps the upload unchunked
        let mut part = Part::stream_with_length(
            reqwest::Body::from(self.data.clone()),
            self.data.len() as u64,
        );
        if let Some(file_name) = &self.file_name {
            part = part.file_name(file_name.clone());
        }
        if let Some(content_type) = &self.content_type {
            part = part.mime_str(content_type)?;
        }
        Ok(part)
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
    Bytes(Bytes),
}

/// Rebuildable description of a request relative to an endpoint base URL
///
/// Every retry attempt builds a fresh [`RequestBuilder`] from this.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = RequestBody::Multipart(fields);
        self
    }

    pub fn bytes(mut self, data: Bytes) -> Self {
        self.body = RequestBody::Bytes(data);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn build(
        &self,
        client: &Client,
        url: Url,
        authorization: &str,
        default_timeout: Duration,
    ) -> Result<RequestBuilder, ClientError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::InvalidRequest(format!("header value: {}", e)))?;
            headers.insert(name, value);
        }
        let authorization = HeaderValue::from_str(authorization)
            .map_err(|e| ClientError::InvalidRequest(format!("authorization: {}", e)))?;
        headers.insert(reqwest::header::AUTHORIZATION, authorization);

        let mut builder = client
            .request(self.method.clone(), url)
            .headers(headers)
            .timeout(self.timeout.unwrap_or(default_timeout));

        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Bytes(data) => builder.body(data.clone()),
            RequestBody::Multipart(fields) => {
                let mut form = Form::new();
                for field in fields {
                    let part = field.to_part().map_err(|e| {
                        ClientError::InvalidRequest(format!("part {}: {}", field.name, e))
                    })?;
                    form = form.part(field.name.clone(), part);
                }
                builder.multipart(form)
            }
        };

        Ok(builder)
    }
}
