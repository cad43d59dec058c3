//! GitHub source fetcher.
//!
//! Lists a repository's full recursive file tree via the git trees API and
//! downloads raw file content from the raw-content host. Authenticated with
//! an optional bearer token read from the environment. Base URLs are
//! configurable so tests (and GitHub Enterprise installs) can point
//! elsewhere.

use serde::Deserialize;

use crate::config::GithubConfig;
use crate::error::FetchError;

/// One entry from a recursive tree listing.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: String,
    /// `"blob"` for files, `"tree"` for directories.
    pub kind: String,
    pub size: Option<i64>,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// A full tree listing. `truncated` is set when the remote capped the
/// response; callers decide whether to proceed with the partial tree.
#[derive(Debug, Clone)]
pub struct TreeListing {
    pub entries: Vec<TreeEntry>,
    pub truncated: bool,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeNode>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeNode {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<i64>,
}

pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    raw_base: String,
    token: Option<String>,
}

impl GithubClient {
    /// Build a client from configuration. The bearer token, if any, comes
    /// from the environment variable named in `config.token_env`.
    pub fn new(config: &GithubConfig) -> Result<Self, FetchError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty());

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("docpilot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            raw_base: config.raw_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Override the bearer token. Intended for tests.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// List the full recursive file tree at `reference` (branch or commit).
    pub async fn list_tree(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> Result<TreeListing, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base, owner, repo, reference
        );

        let mut req = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body: TreeResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        Ok(TreeListing {
            entries: body
                .tree
                .into_iter()
                .map(|n| TreeEntry {
                    path: n.path,
                    kind: n.kind,
                    size: n.size,
                })
                .collect(),
            truncated: body.truncated,
        })
    }

    /// Download one file's raw content. A failure here is scoped to the
    /// file; callers skip it without aborting the batch.
    pub async fn fetch_raw(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        path: &str,
    ) -> Result<String, FetchError> {
        let url = format!("{}/{}/{}/{}/{}", self.raw_base, owner, repo, reference, path);

        let mut req = self.http.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        Ok(resp.text().await?)
    }
}

/// Web URL for a file at a branch, used in citations.
pub fn blob_url(owner: &str, repo: &str, branch: &str, path: &str) -> String {
    format!("https://github.com/{owner}/{repo}/blob/{branch}/{path}")
}
