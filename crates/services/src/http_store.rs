//! Durable store client speaking the progress HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use learn_core::model::{ModuleId, ProgressDelta, ProgressRecord, QuizCompletion, QuizId, UserId};
use learn_core::wire::{
    CompletionQuery, CompletionResponse, MergeProgressRequest, ProgressQuery, ProgressResponse,
    ResetProgressRequest, USER_HEADER,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use storage::repository::{CompletionStore, CompletionWrite, ProgressStore, StorageError};
use tracing::debug;
use url::Url;

#[derive(Clone)]
pub struct HttpProgressStore {
    client: Client,
    base_url: Url,
}

impl HttpProgressStore {
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    #[must_use]
    pub fn with_client(client: Client, mut base_url: Url) -> Self {
        // Url::join drops the last path segment unless it ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, StorageError> {
        self.base_url
            .join(path)
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn send(&self, request: RequestBuilder, user: UserId) -> Result<Response, StorageError> {
        request
            .header(USER_HEADER, user.to_string())
            .send()
            .await
            .map_err(transport_err)
    }

    async fn progress_call(
        &self,
        request: RequestBuilder,
        user: UserId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let response = ensure_success(self.send(request, user).await?)?;
        let body: ProgressResponse = decode(response).await?;
        body.into_record()
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

fn transport_err(err: reqwest::Error) -> StorageError {
    if err.is_decode() {
        StorageError::Serialization(err.to_string())
    } else {
        StorageError::Unavailable(err.to_string())
    }
}

/// A non-success answer is "unknown", never "zero progress".
fn ensure_success(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(StorageError::Unavailable(format!(
            "{} answered {status}",
            response.url()
        )))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StorageError> {
    response.json::<T>().await.map_err(transport_err)
}

fn require_record(
    record: Option<ProgressRecord>,
    module: ModuleId,
) -> Result<ProgressRecord, StorageError> {
    record.ok_or_else(|| {
        StorageError::Serialization(format!("empty progress response for module {module}"))
    })
}

#[async_trait]
impl ProgressStore for HttpProgressStore {
    async fn fetch_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        let url = self.endpoint("progress")?;
        let request = self
            .client
            .get(url)
            .query(&ProgressQuery { module_id: module });
        self.progress_call(request, user).await
    }

    async fn merge_progress(
        &self,
        user: UserId,
        module: ModuleId,
        delta: &ProgressDelta,
    ) -> Result<ProgressRecord, StorageError> {
        let url = self.endpoint("progress")?;
        let request = self.client.post(url).json(&MergeProgressRequest {
            module_id: module,
            delta: delta.clone(),
        });
        let record = self.progress_call(request, user).await?;
        require_record(record, module)
    }

    async fn reset_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<ProgressRecord, StorageError> {
        let url = self.endpoint("progress/reset")?;
        let request = self
            .client
            .post(url)
            .json(&ResetProgressRequest { module_id: module });
        let record = self.progress_call(request, user).await?;
        require_record(record, module)
    }
}

#[async_trait]
impl CompletionStore for HttpProgressStore {
    async fn get_completion(
        &self,
        user: UserId,
        quiz: QuizId,
    ) -> Result<Option<QuizCompletion>, StorageError> {
        let url = self.endpoint("quiz-completions")?;
        let request = self
            .client
            .get(url)
            .query(&CompletionQuery { quiz_id: quiz });
        let response = self.send(request, user).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%user, %quiz, "no durable completion");
            return Ok(None);
        }
        let response = ensure_success(response)?;
        decode(response).await.map(Some)
    }

    async fn record_completion(
        &self,
        user: UserId,
        completion: &QuizCompletion,
    ) -> Result<CompletionWrite, StorageError> {
        let url = self.endpoint("quiz-completions")?;
        let request = self.client.post(url).json(completion);
        let response = ensure_success(self.send(request, user).await?)?;
        let body: CompletionResponse = decode(response).await?;
        Ok(if body.created {
            CompletionWrite::Created(body.completion)
        } else {
            CompletionWrite::Existing(body.completion)
        })
    }
}
