//! Network collaborators: the key service and the conversation store.
//!
//! Both are traits so the lifecycle manager can run against the HTTP client
//! here or an in-process implementation.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use taskvault_shared::api::keys::{
    PersistKeysRequest, RotateKeysRequest, RotateKeysResponse, WorkspaceKeysResponse,
};
use taskvault_shared::api::message::{
    ConversationListResponse, CreateConversationResponse, Message, SendMessageRequest,
    UpdateContentRequest,
};
use taskvault_shared::constants::USER_ID_HEADER;
use taskvault_shared::ids::{ConversationId, MessageId, UserId, WorkspaceId};

use crate::config::CryptoConfig;
use crate::error::CryptoError;

/// Server-side home of public keys and wrapped private keys.
#[async_trait]
pub trait RemoteKeyService: Send + Sync {
    /// The caller's key record for a workspace, or `None` if never published.
    async fn fetch_workspace_keys(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Option<WorkspaceKeysResponse>, CryptoError>;

    /// Publish a first-use key record.
    async fn persist_keys(&self, request: &PersistKeysRequest) -> Result<(), CryptoError>;

    /// Publish a replacement pair. The service moves the previous record
    /// into history.
    async fn rotate_keys(
        &self,
        workspace_id: WorkspaceId,
        request: &RotateKeysRequest,
    ) -> Result<RotateKeysResponse, CryptoError>;
}

/// Read/write access to message content. Only `content` is ever changed.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn list_conversations(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ConversationId>, CryptoError>;

    async fn list_messages(&self, conversation_id: ConversationId)
        -> Result<Vec<Message>, CryptoError>;

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Message, CryptoError>;

    async fn update_message_content(
        &self,
        message_id: MessageId,
        content: &str,
    ) -> Result<(), CryptoError>;
}

/// HTTP client for the key service and conversation endpoints. Every request
/// carries the acting user in the `x-user-id` header.
#[derive(Debug, Clone)]
pub struct HttpKeyService {
    client: reqwest::Client,
    base_url: String,
    user_id: UserId,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpKeyService {
    pub fn new(config: &CryptoConfig, user_id: UserId) -> Result<Self, CryptoError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CryptoError::ConfigError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.key_service_url.trim_end_matches('/').to_string(),
            user_id,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Open a new conversation in a workspace.
    pub async fn create_conversation(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<ConversationId, CryptoError> {
        let response = self
            .client
            .post(self.url(&format!("/api/workspaces/{workspace_id}/conversations")))
            .header(USER_ID_HEADER, self.user_id.to_string())
            .send()
            .await?;
        let body: CreateConversationResponse = check(response).await?.json().await?;
        Ok(body.id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header(USER_ID_HEADER, self.user_id.to_string())
    }

    fn send_json<T: serde::Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &T,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(USER_ID_HEADER, self.user_id.to_string())
            .json(body)
    }
}

/// Turn a non-success response into the matching error. 5xx responses count
/// as the service being unavailable.
async fn check(response: Response) -> Result<Response, CryptoError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    if status.is_server_error() {
        Err(CryptoError::NetworkUnavailable(format!("{status}: {message}")))
    } else {
        Err(CryptoError::RemoteError {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteKeyService for HttpKeyService {
    async fn fetch_workspace_keys(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Option<WorkspaceKeysResponse>, CryptoError> {
        let response = self
            .get(&format!("/api/workspaces/{workspace_id}/keys"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let keys = check(response).await?.json().await?;
        Ok(Some(keys))
    }

    async fn persist_keys(&self, request: &PersistKeysRequest) -> Result<(), CryptoError> {
        let response = self
            .send_json(reqwest::Method::PATCH, "/api/user/keys", request)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn rotate_keys(
        &self,
        workspace_id: WorkspaceId,
        request: &RotateKeysRequest,
    ) -> Result<RotateKeysResponse, CryptoError> {
        let response = self
            .send_json(
                reqwest::Method::POST,
                &format!("/api/workspaces/{workspace_id}/rotate-keys"),
                request,
            )
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

#[async_trait]
impl ConversationStore for HttpKeyService {
    async fn list_conversations(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ConversationId>, CryptoError> {
        let response = self
            .get(&format!("/api/workspaces/{workspace_id}/conversations"))
            .send()
            .await?;
        let body: ConversationListResponse = check(response).await?.json().await?;
        Ok(body.conversations)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, CryptoError> {
        let response = self
            .get(&format!("/api/conversations/{conversation_id}/messages"))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Message, CryptoError> {
        let body = SendMessageRequest {
            content: content.to_string(),
        };
        let response = self
            .send_json(
                reqwest::Method::POST,
                &format!("/api/conversations/{conversation_id}/messages"),
                &body,
            )
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn update_message_content(
        &self,
        message_id: MessageId,
        content: &str,
    ) -> Result<(), CryptoError> {
        let body = UpdateContentRequest {
            content: content.to_string(),
        };
        let response = self
            .send_json(
                reqwest::Method::PUT,
                &format!("/api/messages/{message_id}/content"),
                &body,
            )
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(url: &str) -> HttpKeyService {
        let config = CryptoConfig {
            key_service_url: url.to_string(),
            request_timeout_secs: 2,
            ..CryptoConfig::default()
        };
        HttpKeyService::new(&config, UserId::new()).unwrap()
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let svc = service("http://localhost:3000/");
        assert_eq!(svc.url("/api/user/keys"), "http://localhost:3000/api/user/keys");
    }

    #[tokio::test]
    async fn unreachable_service_is_network_unavailable() {
        let svc = service("http://127.0.0.1:9");
        let result = svc.fetch_workspace_keys(WorkspaceId::new()).await;
        assert!(matches!(result, Err(CryptoError::NetworkUnavailable(_))));

        let result = svc.list_conversations(WorkspaceId::new()).await;
        assert!(matches!(result, Err(CryptoError::NetworkUnavailable(_))));
    }
}
