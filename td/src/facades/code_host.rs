//! Thin typed façade over the code-hosting platform's REST/Git API:
//! read file contents at a ref, create branches, push commits, open
//! draft PRs. The wire protocol itself (auth, pagination, rate limits)
//! is treated as an external collaborator's concern — this trait names
//! only the operations the Orchestrator actually drives.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CodeHostError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected response ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct PullRequestDraft {
    pub repo: String,
    pub base_branch: String,
    pub head_branch: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn read_file(&self, repo: &str, path: &str, git_ref: &str) -> Result<String, CodeHostError>;
    async fn create_branch(&self, repo: &str, branch: &str, from_ref: &str) -> Result<(), CodeHostError>;
    async fn push_commit(&self, repo: &str, branch: &str, message: &str, diff: &str) -> Result<(), CodeHostError>;
    async fn open_draft_pr(&self, draft: PullRequestDraft) -> Result<PullRequestRef, CodeHostError>;
}

/// GitHub-shaped REST implementation. Diffs passed to `push_commit` are
/// expected to already be unified-diff normalized (see `crate::patch`).
pub struct GitHubCodeHost {
    http: Client,
    base_url: String,
    token: String,
}

impl GitHubCodeHost {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: Client::builder().build().expect("reqwest client builds with default config"),
            base_url: "https://api.github.com".to_string(),
            token: token.into(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

#[async_trait]
impl CodeHost for GitHubCodeHost {
    async fn read_file(&self, repo: &str, path: &str, git_ref: &str) -> Result<String, CodeHostError> {
        debug!(repo, path, git_ref, "GitHubCodeHost::read_file: called");
        let url = format!("{}/repos/{}/contents/{}?ref={}", self.base_url, repo, path, git_ref);
        let response = self.http.get(&url).header("Authorization", self.auth_header()).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CodeHostError::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CodeHostError::UnexpectedResponse { status, body });
        }
        #[derive(Deserialize)]
        struct ContentResponse {
            content: String,
        }
        let parsed: ContentResponse = response.json().await?;
        let cleaned: String = parsed.content.chars().filter(|c| !c.is_whitespace()).collect();
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(cleaned)
            .map_err(|e| CodeHostError::UnexpectedResponse {
                status: 0,
                body: e.to_string(),
            })?;
        Ok(String::from_utf8_lossy(&decoded).to_string())
    }

    async fn create_branch(&self, repo: &str, branch: &str, from_ref: &str) -> Result<(), CodeHostError> {
        debug!(repo, branch, from_ref, "GitHubCodeHost::create_branch: called");
        let url = format!("{}/repos/{}/git/refs", self.base_url, repo);
        let body = serde_json::json!({ "ref": format!("refs/heads/{}", branch), "sha": from_ref });
        let response = self.http.post(&url).header("Authorization", self.auth_header()).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(CodeHostError::UnexpectedResponse { status, body: text });
        }
        Ok(())
    }

    async fn push_commit(&self, repo: &str, branch: &str, message: &str, diff: &str) -> Result<(), CodeHostError> {
        debug!(repo, branch, diff_len = diff.len(), "GitHubCodeHost::push_commit: called");
        let url = format!("{}/repos/{}/commits", self.base_url, repo);
        let body = serde_json::json!({ "branch": branch, "message": message, "patch": diff });
        let response = self.http.post(&url).header("Authorization", self.auth_header()).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(CodeHostError::UnexpectedResponse { status, body: text });
        }
        Ok(())
    }

    async fn open_draft_pr(&self, draft: PullRequestDraft) -> Result<PullRequestRef, CodeHostError> {
        debug!(repo = %draft.repo, "GitHubCodeHost::open_draft_pr: called");
        let url = format!("{}/repos/{}/pulls", self.base_url, draft.repo);
        let body = serde_json::json!({
            "title": draft.title,
            "body": draft.body,
            "head": draft.head_branch,
            "base": draft.base_branch,
            "draft": true,
        });
        let response = self.http.post(&url).header("Authorization", self.auth_header()).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(CodeHostError::UnexpectedResponse { status, body: text });
        }
        Ok(response.json().await?)
    }
}
