//! reqwest implementation of [`EmergencyService`]

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use sosync_core::{
    Coordinates, CreateEmergencyRequest, EmergencyId, EmergencyService, EmergencySession,
    SessionError, SessionResult,
};

use crate::config::HttpServiceConfig;

/// Emergency service reached over HTTP.
///
/// | operation | request |
/// |---|---|
/// | create | `POST {base}/emergency` |
/// | activate | `PUT {base}/emergency/{id}/activate` |
/// | cancel | `PUT {base}/emergency/{id}/cancel` |
/// | begin recovery | `PUT {base}/emergency/{id}/recover` |
/// | complete recovery | `PUT {base}/emergency/{id}/complete` |
/// | location | `POST {base}/emergency/{id}/location` |
/// | fetch | `GET {base}/emergency/{id}` |
///
/// Every call answers with the full record.
#[derive(Debug, Clone)]
pub struct HttpEmergencyService {
    client: Client,
    config: HttpServiceConfig,
}

#[derive(Serialize)]
struct EmptyBody {}

impl HttpEmergencyService {
    pub fn new(config: HttpServiceConfig) -> SessionResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                SessionError::invalid_configuration(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpServiceConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.config.endpoint(path));
        match &self.config.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> SessionResult<EmergencySession> {
        debug!(%method, path, "Emergency service request");
        let mut builder = self.request(method.clone(), path);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_transport(e))?;
        let status = response.status();
        if !status.is_success() {
            warn!(%method, path, status = status.as_u16(), "Emergency service rejected request");
            return Err(SessionError::ServerError {
                status: status.as_u16(),
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Err(SessionError::NoData);
        }

        let bytes = response.bytes().await.map_err(|e| self.map_transport(e))?;
        if bytes.is_empty() {
            return Err(SessionError::NoData);
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(path, error = %e, "Undecodable emergency record");
            SessionError::invalid_response(format!("{}: {}", path, e))
        })
    }

    fn map_transport(&self, error: reqwest::Error) -> SessionError {
        if error.is_timeout() {
            SessionError::OperationTimeout {
                duration_ms: self.config.request_timeout().as_millis() as u64,
            }
        } else if error.is_decode() {
            SessionError::invalid_response(error.to_string())
        } else {
            SessionError::network_error(error.to_string())
        }
    }
}

#[async_trait]
impl EmergencyService for HttpEmergencyService {
    async fn create(&self, request: &CreateEmergencyRequest) -> SessionResult<EmergencySession> {
        self.execute(Method::POST, "emergency", Some(request)).await
    }

    async fn activate(
        &self,
        id: EmergencyId,
        coordinates: Option<Coordinates>,
    ) -> SessionResult<EmergencySession> {
        let path = format!("emergency/{}/activate", id);
        match coordinates {
            Some(coordinates) => self.execute(Method::PUT, &path, Some(&coordinates)).await,
            None => self.execute(Method::PUT, &path, Some(&EmptyBody {})).await,
        }
    }

    async fn cancel(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        let path = format!("emergency/{}/cancel", id);
        self.execute(Method::PUT, &path, Some(&EmptyBody {})).await
    }

    async fn begin_recovery(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        let path = format!("emergency/{}/recover", id);
        self.execute(Method::PUT, &path, Some(&EmptyBody {})).await
    }

    async fn complete_recovery(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        let path = format!("emergency/{}/complete", id);
        self.execute(Method::PUT, &path, Some(&EmptyBody {})).await
    }

    async fn update_location(
        &self,
        id: EmergencyId,
        coordinates: Coordinates,
    ) -> SessionResult<EmergencySession> {
        let path = format!("emergency/{}/location", id);
        self.execute(Method::POST, &path, Some(&coordinates)).await
    }

    async fn fetch(&self, id: EmergencyId) -> SessionResult<EmergencySession> {
        let path = format!("emergency/{}", id);
        self.execute::<EmptyBody>(Method::GET, &path, None).await
    }
}
