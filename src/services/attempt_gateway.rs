use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::attempt::{ExamDetails, Question};
use crate::core::config::Settings;
use crate::schemas::attempt::{
    unwrap_envelope, AttemptResult, AttemptSnapshot, ErrorBody, SaveAnswerRequest,
    StartedAttempt, UpdateTimeRequest,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authentication token not available")]
    MissingToken,
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("Exam service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected response from exam service: {0}")]
    Decode(String),
}

/// Source of the identity provider's bearer token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// A token fixed at construction time.
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn missing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Remote exam-attempt backend. Implementations never retry.
#[async_trait]
pub trait AttemptApi: Send + Sync {
    async fn rules(&self, exam_id: &str) -> Result<ExamDetails, GatewayError>;
    async fn start(&self, exam_id: &str) -> Result<StartedAttempt, GatewayError>;
    async fn status(&self, attempt_id: &str) -> Result<AttemptSnapshot, GatewayError>;
    async fn questions(&self, attempt_id: &str) -> Result<Vec<Question>, GatewayError>;
    async fn save_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        request: &SaveAnswerRequest,
    ) -> Result<(), GatewayError>;
    async fn update_time(&self, attempt_id: &str, time_remaining: u64) -> Result<(), GatewayError>;
    async fn submit(&self, attempt_id: &str) -> Result<(), GatewayError>;
    async fn result(&self, attempt_id: &str) -> Result<AttemptResult, GatewayError>;
}

#[derive(Clone)]
pub struct HttpAttemptGateway {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpAttemptGateway {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), tokens })
    }

    pub(crate) fn from_settings(
        settings: &Settings,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, GatewayError> {
        let gateway = settings.gateway();
        Self::new(&gateway.base_url, Duration::from_secs(gateway.timeout_seconds), tokens)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<String, GatewayError> {
        let token = self.tokens.access_token().await.ok_or(GatewayError::MissingToken)?;

        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method.clone(), &url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(ErrorBody::into_message)
                .unwrap_or_else(|| format!("Exam service returned status {}", status.as_u16()));
            tracing::warn!(
                method = %method,
                path,
                status = status.as_u16(),
                error = %message,
                "Exam service request failed"
            );
            return Err(GatewayError::Http { status: status.as_u16(), message });
        }

        Ok(text)
    }

    async fn fetch<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T, GatewayError> {
        let text = self.send(method, path, None).await?;
        unwrap_envelope::<T>(&text).map_err(|err| {
            tracing::warn!(path, error = %err, "Exam service response could not be decoded");
            GatewayError::Decode(err.to_string())
        })
    }
}

fn encode(value: &impl serde::Serialize) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|err| GatewayError::Decode(err.to_string()))
}

#[async_trait]
impl AttemptApi for HttpAttemptGateway {
    async fn rules(&self, exam_id: &str) -> Result<ExamDetails, GatewayError> {
        self.fetch(Method::GET, &format!("/exam-attempt/rules/{exam_id}")).await
    }

    async fn start(&self, exam_id: &str) -> Result<StartedAttempt, GatewayError> {
        self.fetch(Method::POST, &format!("/exam-attempt/start/{exam_id}")).await
    }

    async fn status(&self, attempt_id: &str) -> Result<AttemptSnapshot, GatewayError> {
        self.fetch(Method::GET, &format!("/exam-attempt/status/{attempt_id}")).await
    }

    async fn questions(&self, attempt_id: &str) -> Result<Vec<Question>, GatewayError> {
        self.fetch(Method::GET, &format!("/exam-attempt/questions/{attempt_id}")).await
    }

    async fn save_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        request: &SaveAnswerRequest,
    ) -> Result<(), GatewayError> {
        let path = format!("/exam-attempt/answer/{attempt_id}/{question_id}");
        self.send(Method::POST, &path, Some(encode(request)?)).await.map(|_| ())
    }

    async fn update_time(&self, attempt_id: &str, time_remaining: u64) -> Result<(), GatewayError> {
        let body = encode(&UpdateTimeRequest { time_remaining })?;
        self.send(Method::PUT, &format!("/exam-attempt/time/{attempt_id}"), Some(body))
            .await
            .map(|_| ())
    }

    async fn submit(&self, attempt_id: &str) -> Result<(), GatewayError> {
        self.send(Method::POST, &format!("/exam-attempt/submit/{attempt_id}"), None)
            .await
            .map(|_| ())
    }

    async fn result(&self, attempt_id: &str) -> Result<AttemptResult, GatewayError> {
        self.fetch(Method::GET, &format!("/exam-attempt/result/{attempt_id}")).await
    }
}
