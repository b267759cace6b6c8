//! REST client for the passfile server.
//!
//! Every response is wrapped in an `OkBadResponse` envelope
//! (`{ "success": bool, "message": string?, "data": T? }`). Sealed content
//! travels base64 encoded. Requests carry the session bearer token.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use passmeta_db::{PassFile, PassFileId};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    CreatedRemote, DeleteOutcome, PushOutcome, RemoteClient, RemoteError, RemotePassFile,
    RemoteResult,
};

/// Response envelope used by every server endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OkBadResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> OkBadResponse<T> {
    fn bad(message: Option<String>) -> Self {
        Self {
            success: false,
            message,
            data: None,
        }
    }

    /// Payload of a successful response, `RemoteError::Api` otherwise.
    pub fn into_data(self, status: StatusCode) -> RemoteResult<T> {
        if !status.is_success() || !self.success {
            return Err(api_error(status, self.message));
        }
        self.data
            .ok_or_else(|| api_error(status, Some("response carries no data".into())))
    }
}

#[derive(Debug, Serialize)]
struct PassFileRequest<'a> {
    name: &'a str,
    color: Option<&'a str>,
    data_encrypted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_version: Option<u32>,
}

impl<'a> PassFileRequest<'a> {
    fn new(passfile: &'a PassFile, expected_version: Option<u32>) -> Self {
        Self {
            name: &passfile.name,
            color: passfile.color.as_deref(),
            data_encrypted: base64::engine::general_purpose::STANDARD
                .encode(&passfile.data_encrypted),
            expected_version,
        }
    }
}

fn api_error(status: StatusCode, message: Option<String>) -> RemoteError {
    RemoteError::Api {
        status: status.as_u16(),
        message: message
            .filter(|m| !m.trim().is_empty())
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_default(),
    }
}

fn network_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Network(e.to_string())
}

/// Map a push response: 409 is an expected version conflict, 404 means the
/// passfile was deleted on the server.
pub fn classify_push(
    status: StatusCode,
    body: OkBadResponse<CreatedRemote>,
) -> RemoteResult<PushOutcome> {
    if status == StatusCode::CONFLICT {
        let remote_version = body.data.map(|d| d.version);
        return Ok(PushOutcome::VersionConflict { remote_version });
    }
    if status == StatusCode::NOT_FOUND {
        return Ok(PushOutcome::NotFound);
    }
    body.into_data(status)
        .map(|d| PushOutcome::Pushed { version: d.version })
}

/// Map a delete response: 404 means the passfile is already gone.
pub fn classify_delete<T>(
    status: StatusCode,
    body: OkBadResponse<T>,
) -> RemoteResult<DeleteOutcome> {
    if status == StatusCode::NOT_FOUND {
        return Ok(DeleteOutcome::NotFound);
    }
    if status.is_success() && body.success {
        return Ok(DeleteOutcome::Deleted);
    }
    Err(api_error(status, body.message))
}

/// `RemoteClient` over the server's JSON API.
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpRemoteClient {
    /// Build a client. No request timeout is applied unless one is given.
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        timeout: Option<Duration>,
    ) -> RemoteResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Network(format!("invalid server url {base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(network_error)?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> RemoteResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::Network(format!("invalid endpoint {path}: {e}")))
    }

    async fn read_body<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> RemoteResult<(StatusCode, OkBadResponse<T>)> {
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(network_error)?;
        let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            OkBadResponse::bad(Some(String::from_utf8_lossy(&bytes).into_owned()))
        });
        Ok((status, body))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn fetch_list(&self) -> RemoteResult<Vec<RemotePassFile>> {
        let resp = self
            .client
            .get(self.endpoint("passfiles")?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(network_error)?;
        let (status, body) = Self::read_body::<Vec<RemotePassFile>>(resp).await?;
        let list = body.into_data(status)?;
        tracing::debug!("Fetched {} remote passfiles", list.len());
        Ok(list)
    }

    async fn push(&self, passfile: &PassFile, expected_version: u32) -> RemoteResult<PushOutcome> {
        let resp = self
            .client
            .patch(self.endpoint(&format!("passfiles/{}", passfile.id))?)
            .bearer_auth(&self.token)
            .json(&PassFileRequest::new(passfile, Some(expected_version)))
            .send()
            .await
            .map_err(network_error)?;
        let (status, body) = Self::read_body(resp).await?;
        classify_push(status, body)
    }

    async fn push_new(&self, passfile: &PassFile) -> RemoteResult<CreatedRemote> {
        let resp = self
            .client
            .post(self.endpoint("passfiles/new")?)
            .bearer_auth(&self.token)
            .json(&PassFileRequest::new(passfile, None))
            .send()
            .await
            .map_err(network_error)?;
        let (status, body) = Self::read_body::<CreatedRemote>(resp).await?;
        body.into_data(status)
    }

    async fn delete(&self, id: PassFileId) -> RemoteResult<DeleteOutcome> {
        let resp = self
            .client
            .delete(self.endpoint(&format!("passfiles/{id}"))?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(network_error)?;
        let (status, body) = Self::read_body::<serde_json::Value>(resp).await?;
        classify_delete(status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok<T>(data: T) -> OkBadResponse<T> {
        OkBadResponse {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    #[test]
    fn push_success_returns_new_version() {
        let body = ok(CreatedRemote {
            id: PassFileId(5),
            version: 8,
        });
        assert_eq!(
            classify_push(StatusCode::OK, body),
            Ok(PushOutcome::Pushed { version: 8 })
        );
    }

    #[test]
    fn push_409_is_version_conflict() {
        let body = ok(CreatedRemote {
            id: PassFileId(5),
            version: 9,
        });
        assert_eq!(
            classify_push(StatusCode::CONFLICT, body),
            Ok(PushOutcome::VersionConflict {
                remote_version: Some(9)
            })
        );
        assert_eq!(
            classify_push(StatusCode::CONFLICT, OkBadResponse::bad(None)),
            Ok(PushOutcome::VersionConflict {
                remote_version: None
            })
        );
    }

    #[test]
    fn push_404_means_deleted_remotely() {
        let body: OkBadResponse<CreatedRemote> =
            OkBadResponse::bad(Some("no such passfile".into()));
        assert_eq!(
            classify_push(StatusCode::NOT_FOUND, body),
            Ok(PushOutcome::NotFound)
        );
    }

    #[test]
    fn bad_envelope_is_api_error() {
        let body: OkBadResponse<CreatedRemote> = OkBadResponse::bad(Some("nope".into()));
        assert_eq!(
            classify_push(StatusCode::OK, body),
            Err(RemoteError::Api {
                status: 200,
                message: "nope".into()
            })
        );
        let result = classify_push(StatusCode::INTERNAL_SERVER_ERROR, OkBadResponse::bad(None));
        assert!(matches!(result, Err(RemoteError::Api { status: 500, .. })));
    }

    #[test]
    fn delete_classification() {
        let gone: OkBadResponse<()> = OkBadResponse::bad(None);
        assert_eq!(
            classify_delete(StatusCode::NOT_FOUND, gone),
            Ok(DeleteOutcome::NotFound)
        );
        assert_eq!(
            classify_delete(StatusCode::OK, ok(())),
            Ok(DeleteOutcome::Deleted)
        );
        assert!(classify_delete(StatusCode::FORBIDDEN, OkBadResponse::<()>::bad(None)).is_err());
    }

    #[test]
    fn envelope_parses_server_json() {
        let json = r##"{
            "success": true,
            "message": null,
            "data": [{
                "id": 3, "name": "Mail", "color": "#AABBCC", "version": 2,
                "data_encrypted": "AQID",
                "created_on": "2024-01-01T00:00:00Z",
                "info_changed_on": "2024-01-01T00:00:00Z",
                "version_changed_on": "2024-01-02T00:00:00Z"
            }]
        }"##;
        let body: OkBadResponse<Vec<RemotePassFile>> = serde_json::from_str(json).unwrap();
        let list = body.into_data(StatusCode::OK).unwrap();
        assert_eq!(list[0].id, PassFileId(3));
        assert_eq!(list[0].data_encrypted, vec![1, 2, 3]);
    }

    #[test]
    fn request_carries_expected_version_and_base64() {
        let pf = PassFile::new_local(PassFileId(-1), "Mail".into(), None, vec![1, 2, 3]);
        let json = serde_json::to_value(PassFileRequest::new(&pf, Some(4))).unwrap();
        assert_eq!(json["expected_version"], 4);
        assert_eq!(json["data_encrypted"], "AQID");

        let json = serde_json::to_value(PassFileRequest::new(&pf, None)).unwrap();
        assert!(json.get("expected_version").is_none());
    }

    #[test]
    fn endpoints_join_under_base_path() {
        let client = HttpRemoteClient::new("https://example.org/api", "t", None).unwrap();
        assert_eq!(
            client.endpoint("passfiles/7").unwrap().as_str(),
            "https://example.org/api/passfiles/7"
        );
        assert!(HttpRemoteClient::new("not a url", "t", None).is_err());
    }
}
