//! HTTP key directory client.
//!
//! Speaks the chat backend's user routes:
//!
//! - `GET  {base}/users/{id}/public-key`
//! - `POST {base}/users/{id}/public-key` with `{"public_key", "key_version"}`
//!
//! Both carry `Authorization: Bearer <credential>`. The user id is encoded
//! as a single path segment; `.` and `..` are refused. Status mapping:
//!
//! | Response             | Error                        | Retried |
//! |----------------------|------------------------------|---------|
//! | 404                  | `NotFound`                   | no      |
//! | 401, 403             | `Unauthorized`               | no      |
//! | 408, 429, 5xx        | `Status`                     | yes     |
//! | other 4xx            | `Rejected`                   | no      |
//! | connect failure      | `Transport`                  | yes     |
//! | request timeout      | `Timeout`                    | yes     |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use veilchat_core::directory::{DirectoryResponse, ErrorBody, UploadAck};

use super::{Credential, DirectoryError, KeyDirectory, PublicKeyRecord};

/// Connection settings for [`HttpKeyDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpDirectoryConfig {
    /// Base URL of the directory, e.g. `https://chat.example.com/api`.
    pub base_url: String,
    /// Transport-level timeout for a single request.
    pub request_timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl HttpDirectoryConfig {
    /// Defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
            user_agent: concat!("veilchat/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Key directory reached over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpKeyDirectory {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpKeyDirectory {
    /// Build a client for the directory at `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryError::Transport` if the base URL cannot carry a
    /// path or the TLS backend cannot be initialized.
    pub fn new(config: &HttpDirectoryConfig) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| DirectoryError::Transport(format!("invalid directory URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::Transport(format!(
                "directory URL cannot carry a path: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            request_timeout: config.request_timeout,
        })
    }

    fn key_url(&self, user_id: &str) -> Result<Url, DirectoryError> {
        if matches!(user_id, "" | "." | "..") {
            return Err(DirectoryError::InvalidUserId { user_id: user_id.to_owned() });
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| DirectoryError::Transport("directory URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["users", user_id, "public-key"]);
        Ok(url)
    }

    /// Body text of a successful response, or the mapped error.
    async fn read_text(&self, user_id: &str, response: Response) -> Result<String, DirectoryError> {
        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_transport(e))?;

        if !status.is_success() {
            return Err(map_status(user_id, status, &text));
        }
        Ok(text)
    }

    fn map_transport(&self, error: reqwest::Error) -> DirectoryError {
        if error.is_timeout() {
            DirectoryError::Timeout(self.request_timeout)
        } else {
            DirectoryError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl KeyDirectory for HttpKeyDirectory {
    async fn get_public_key(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<PublicKeyRecord, DirectoryError> {
        let response = self
            .client
            .get(self.key_url(user_id)?)
            .bearer_auth(credential.expose())
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let record: PublicKeyRecord = parse_body(&self.read_text(user_id, response).await?)?;
        tracing::debug!(user_id, version = record.key_version, "fetched public key");
        Ok(record)
    }

    async fn put_public_key(
        &self,
        user_id: &str,
        record: &PublicKeyRecord,
        credential: &Credential,
    ) -> Result<u64, DirectoryError> {
        let response = self
            .client
            .post(self.key_url(user_id)?)
            .bearer_auth(credential.expose())
            .json(record)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let text = self.read_text(user_id, response).await?;
        let ack = if text.trim().is_empty() { UploadAck::default() } else { parse_body(&text)? };
        Ok(ack.key_version.unwrap_or(record.key_version))
    }
}

fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T, DirectoryError> {
    serde_json::from_str::<DirectoryResponse<T>>(text)
        .map(DirectoryResponse::into_inner)
        .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))
}

fn map_status(user_id: &str, status: StatusCode, body: &str) -> DirectoryError {
    match status {
        StatusCode::NOT_FOUND => DirectoryError::NotFound { user_id: user_id.to_owned() },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DirectoryError::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            DirectoryError::Status { status: status.as_u16() }
        },
        s if s.is_server_error() => DirectoryError::Status { status: s.as_u16() },
        s => {
            let message = serde_json::from_str::<ErrorBody>(body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| s.canonical_reason().unwrap_or("unknown").to_owned());
            DirectoryError::Rejected { status: s.as_u16(), message }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            map_status("bob", StatusCode::NOT_FOUND, ""),
            DirectoryError::NotFound { user_id: "bob".into() }
        );
        assert_eq!(map_status("bob", StatusCode::FORBIDDEN, ""), DirectoryError::Unauthorized);
        assert_eq!(
            map_status("bob", StatusCode::BAD_GATEWAY, ""),
            DirectoryError::Status { status: 502 }
        );
        assert!(map_status("bob", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
    }

    #[test]
    fn rejection_carries_backend_message() {
        let body = r#"{"status":"error","message":"Invalid public key format"}"#;

        let error = map_status("bob", StatusCode::BAD_REQUEST, body);

        assert_eq!(
            error,
            DirectoryError::Rejected { status: 400, message: "Invalid public key format".into() }
        );
        assert!(!error.is_transient());
    }

    #[test]
    fn non_json_body_is_invalid_response() {
        let result = parse_body::<PublicKeyRecord>("<html>502</html>");

        assert!(matches!(result, Err(DirectoryError::InvalidResponse(_))));
    }

    fn directory(base: &str) -> HttpKeyDirectory {
        HttpKeyDirectory::new(&HttpDirectoryConfig::new(base)).unwrap()
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let url = directory("http://localhost:5000/api/").key_url("7").unwrap();

        assert_eq!(url.as_str(), "http://localhost:5000/api/users/7/public-key");
    }

    #[test]
    fn user_id_stays_one_path_segment() {
        let url = directory("http://h/api").key_url("../admin/keys?x=1#").unwrap();

        assert_eq!(url.as_str(), "http://h/api/users/..%2Fadmin%2Fkeys%3Fx=1%23/public-key");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn dot_segments_are_refused() {
        let directory = directory("http://h/api");

        for user_id in ["", ".", ".."] {
            assert_eq!(
                directory.key_url(user_id),
                Err(DirectoryError::InvalidUserId { user_id: user_id.into() })
            );
        }
    }

    #[test]
    fn opaque_base_url_is_refused() {
        let result = HttpKeyDirectory::new(&HttpDirectoryConfig::new("mailto:keys@example.com"));

        assert!(matches!(result, Err(DirectoryError::Transport(_))));
    }
}
