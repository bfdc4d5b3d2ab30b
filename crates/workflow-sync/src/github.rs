//! GitHub REST API client
//!
//! Implements [`PipelineRemote`] with the contents API for pipeline files
//! and the Actions API for runs.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use workflow_engine::execution::{RemoteConclusion, RemoteJob, RemoteStatus};
use workflow_engine::RemoteRunSnapshot;

use crate::config::GitHubConfig;
use crate::constants::github;
use crate::error::{Result, SyncError};
use crate::remote::{FileWrite, PipelineRemote, RemoteFile, RunSummary};

/// Jobs fetched per run detail request
const JOBS_PER_PAGE: u32 = 100;

/// Runs fetched per list request
const RUNS_PER_PAGE: u32 = 20;

/// Client for one repository and branch
pub struct GitHubClient {
    http_client: reqwest::Client,
    config: GitHubConfig,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct WriteResponse {
    content: WrittenContent,
}

#[derive(Deserialize)]
struct WrittenContent {
    sha: String,
}

#[derive(Deserialize)]
struct RunsResponse {
    workflow_runs: Vec<RunSummary>,
}

#[derive(Deserialize)]
struct RunResponse {
    id: u64,
    status: RemoteStatus,
    #[serde(default)]
    conclusion: Option<RemoteConclusion>,
}

#[derive(Deserialize)]
struct JobsResponse {
    jobs: Vec<RemoteJob>,
}

impl GitHubClient {
    /// Create a client; fails if owner or repo is missing
    pub fn new(config: GitHubConfig) -> Result<Self> {
        if !config.has_target() {
            return Err(SyncError::InvalidConfig(
                "github.owner and github.repo must be set".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        let token = config.resolved_token();
        if token.is_none() {
            log::warn!(
                "No GitHub token configured; only public read access will work (set {})",
                github::TOKEN_ENV
            );
        }

        Ok(Self {
            http_client,
            config,
            token,
        })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http_client
            .request(method, self.repo_url(path))
            .header(reqwest::header::ACCEPT, github::ACCEPT)
            .header("X-GitHub-Api-Version", github::API_VERSION);

        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T> {
        let response = check(request.send().await?, context).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::decode(format!("{}: {}", context, e)))
    }
}

/// Map a non-success response to a [`SyncError`]
async fn check(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    log::debug!("GitHub API {} for {}: {}", status, context, body);
    Err(classify(status, context, &body))
}

fn classify(status: StatusCode, context: &str, body: &str) -> SyncError {
    let message = api_message(body);
    match status.as_u16() {
        401 => SyncError::Unauthorized(message),
        403 if message.to_lowercase().contains("rate limit") => SyncError::Transient(message),
        403 => SyncError::Unauthorized(message),
        404 => SyncError::NotFound(context.to_string()),
        409 => SyncError::Conflict {
            path: context.to_string(),
            remote_sha: None,
        },
        422 if message.contains("sha") => SyncError::Conflict {
            path: context.to_string(),
            remote_sha: None,
        },
        429 => SyncError::Transient(message),
        code if status.is_server_error() => {
            SyncError::Transient(format!("HTTP {}: {}", code, message))
        }
        code => SyncError::Api {
            status: code,
            message,
        },
    }
}

/// The `message` field of an API error body, or the raw body
fn api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn decode_content(encoded: &str, path: &str) -> Result<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| SyncError::decode(format!("{}: {}", path, e)))?;
    String::from_utf8(bytes).map_err(|e| SyncError::decode(format!("{}: {}", path, e)))
}

#[async_trait]
impl PipelineRemote for GitHubClient {
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>> {
        let request = self
            .request(Method::GET, &format!("contents/{}", path))
            .query(&[("ref", self.config.branch.as_str())]);

        match self.get_json::<ContentsResponse>(request, path).await {
            Ok(file) => Ok(Some(RemoteFile {
                path: path.to_string(),
                content: decode_content(&file.content, path)?,
                sha: file.sha,
            })),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_file(&self, write: FileWrite) -> Result<String> {
        let mut body = json!({
            "message": write.message,
            "content": STANDARD.encode(write.content.as_bytes()),
            "branch": self.config.branch,
        });
        if let Some(sha) = &write.sha {
            body["sha"] = json!(sha);
        }

        let request = self
            .request(Method::PUT, &format!("contents/{}", write.path))
            .json(&body);

        let response: WriteResponse = self
            .get_json(request, &write.path)
            .await
            .map_err(|e| match e {
                // Creating a file that already exists
                SyncError::Api { status: 422, .. } if write.sha.is_none() => SyncError::Conflict {
                    path: write.path.clone(),
                    remote_sha: None,
                },
                other => other,
            })?;

        log::info!("Wrote {} ({})", write.path, response.content.sha);
        Ok(response.content.sha)
    }

    async fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<()> {
        let request = self
            .request(Method::DELETE, &format!("contents/{}", path))
            .json(&json!({
                "message": message,
                "sha": sha,
                "branch": self.config.branch,
            }));

        check(request.send().await?, path).await?;
        log::info!("Deleted {}", path);
        Ok(())
    }

    async fn list_runs(&self, workflow_file: &str) -> Result<Vec<RunSummary>> {
        let per_page = RUNS_PER_PAGE.to_string();
        let request = self
            .request(Method::GET, &format!("actions/workflows/{}/runs", workflow_file))
            .query(&[
                ("branch", self.config.branch.as_str()),
                ("per_page", per_page.as_str()),
            ]);

        let response: RunsResponse = self.get_json(request, workflow_file).await?;
        Ok(response.workflow_runs)
    }

    async fn get_run_detail(&self, run_id: u64) -> Result<RemoteRunSnapshot> {
        let context = format!("run {}", run_id);
        let run: RunResponse = self
            .get_json(
                self.request(Method::GET, &format!("actions/runs/{}", run_id)),
                &context,
            )
            .await?;

        let per_page = JOBS_PER_PAGE.to_string();
        let jobs: JobsResponse = self
            .get_json(
                self.request(Method::GET, &format!("actions/runs/{}/jobs", run_id))
                    .query(&[("per_page", per_page.as_str())]),
                &context,
            )
            .await?;

        Ok(RemoteRunSnapshot {
            run_id: run.id,
            status: run.status,
            conclusion: run.conclusion,
            jobs: jobs.jobs,
        })
    }

    async fn trigger_run(
        &self,
        workflow_file: &str,
        git_ref: &str,
        inputs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let request = self
            .request(
                Method::POST,
                &format!("actions/workflows/{}/dispatches", workflow_file),
            )
            .json(&json!({ "ref": git_ref, "inputs": inputs }));

        check(request.send().await?, workflow_file).await?;
        log::info!("Dispatched {} on {}", workflow_file, git_ref);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GitHubConfig {
        GitHubConfig {
            owner: "acme".to_string(),
            repo: "site".to_string(),
            api_base_url: "https://ghe.example.com/api/v3/".to_string(),
            ..GitHubConfig::default()
        }
    }

    #[test]
    fn test_new_requires_target() {
        let result = GitHubClient::new(GitHubConfig::default());
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_repo_url() {
        let client = GitHubClient::new(config()).unwrap();
        assert_eq!(
            client.repo_url("contents/.github/workflows/ci.yml"),
            "https://ghe.example.com/api/v3/repos/acme/site/contents/.github/workflows/ci.yml"
        );
    }

    #[test]
    fn test_classify_status_codes() {
        let path = ".github/workflows/ci.yml";
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, path, ""),
            SyncError::NotFound(p) if p == path
        ));
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, path, r#"{"message":"Bad credentials"}"#),
            SyncError::Unauthorized(m) if m == "Bad credentials"
        ));
        assert!(matches!(
            classify(StatusCode::CONFLICT, path, ""),
            SyncError::Conflict { .. }
        ));
        assert!(matches!(
            classify(
                StatusCode::UNPROCESSABLE_ENTITY,
                path,
                r#"{"message":"sha wasn't supplied"}"#
            ),
            SyncError::Conflict { .. }
        ));
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, path, r#"{"message":"Invalid ref"}"#),
            SyncError::Api { status: 422, .. }
        ));
        assert!(classify(StatusCode::BAD_GATEWAY, path, "").is_transient());
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, path, "").is_transient());
        assert!(classify(
            StatusCode::FORBIDDEN,
            path,
            r#"{"message":"API rate limit exceeded"}"#
        )
        .is_transient());
    }

    #[test]
    fn test_decode_content_ignores_line_breaks() {
        let encoded = "bmFtZTog\nQ0kK\n";
        assert_eq!(decode_content(encoded, "ci.yml").unwrap(), "name: CI\n");
        assert!(decode_content("***", "ci.yml").is_err());
    }

    #[test]
    fn test_jobs_response_decodes() {
        let body = serde_json::json!({
            "total_count": 1,
            "jobs": [{
                "id": 1,
                "name": "build",
                "status": "in_progress",
                "conclusion": null,
                "started_at": "2026-01-02T03:04:05Z",
                "completed_at": null,
                "html_url": "https://github.com/acme/site/actions/runs/7/job/1",
                "steps": [{
                    "name": "Checkout (c1)",
                    "status": "completed",
                    "conclusion": "success",
                    "number": 1,
                    "started_at": "2026-01-02T03:04:05Z",
                    "completed_at": "2026-01-02T03:04:09Z"
                }]
            }]
        });
        let jobs: JobsResponse = serde_json::from_value(body).unwrap();
        assert_eq!(jobs.jobs.len(), 1);
        assert_eq!(jobs.jobs[0].status, RemoteStatus::InProgress);
        assert_eq!(jobs.jobs[0].steps[0].conclusion, Some(RemoteConclusion::Success));
    }
}
