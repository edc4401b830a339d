//! Resolution of git remotes to commit IDs, used to pin image builds.

use async_trait::async_trait;

/// Resolves the current HEAD commit of a remote repository.
#[async_trait]
pub trait GitService: Send + Sync {
    async fn latest_commit(&self, repository_url: &str) -> anyhow::Result<String>;
}

/// Smart-HTTP implementation: asks the remote's `info/refs` advertisement for
/// the commit HEAD points at. Works against any smart-HTTP git host without
/// shelling out.
pub struct SmartHttpGitService {
    client: reqwest::Client,
}

impl SmartHttpGitService {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GitService for SmartHttpGitService {
    async fn latest_commit(&self, repository_url: &str) -> anyhow::Result<String> {
        let url = format!(
            "{}/info/refs?service=git-upload-pack",
            repository_url.trim_end_matches('/')
        );
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_head_commit(&body)
            .ok_or_else(|| anyhow::anyhow!("no HEAD advertised by {repository_url}"))
    }
}

/// Extracts the HEAD object ID from a pkt-line ref advertisement.
fn parse_head_commit(advertisement: &str) -> Option<String> {
    for line in advertisement.lines() {
        let Some(head_at) = line.find(" HEAD") else {
            continue;
        };
        if head_at < 40 {
            continue;
        }
        let candidate = &line[head_at - 40..head_at];
        if candidate.len() == 40 && candidate.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some(candidate.to_string());
        }
    }
    None
}
