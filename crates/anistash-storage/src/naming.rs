//! Repository naming policies.

use std::str::FromStr;
use std::sync::Arc;

/// Default dataset repository name.
pub const DEFAULT_REPO_NAME: &str = "weaboo-storage";

/// Chooses the destination repository for an anime under an account.
pub trait RepoNamingPolicy: Send + Sync + std::fmt::Debug {
    fn repo_id(&self, username: &str, anime_id: i64) -> String;
}

/// One repository per account.
#[derive(Debug, Clone)]
pub struct GlobalRepo {
    pub name: String,
}

impl RepoNamingPolicy for GlobalRepo {
    fn repo_id(&self, username: &str, _anime_id: i64) -> String {
        format!("{}/{}", username, self.name)
    }
}

/// One repository per anime per account.
#[derive(Debug, Clone)]
pub struct RepoPerAnime {
    pub prefix: String,
}

impl RepoNamingPolicy for RepoPerAnime {
    fn repo_id(&self, username: &str, anime_id: i64) -> String {
        format!("{}/{}-{}", username, self.prefix, anime_id)
    }
}

/// Configured repository layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepoLayout {
    #[default]
    Global,
    PerAnime,
}

impl RepoLayout {
    pub fn policy(&self, repo_name: &str) -> Arc<dyn RepoNamingPolicy> {
        match self {
            RepoLayout::Global => Arc::new(GlobalRepo {
                name: repo_name.to_string(),
            }),
            RepoLayout::PerAnime => Arc::new(RepoPerAnime {
                prefix: repo_name.to_string(),
            }),
        }
    }
}

impl FromStr for RepoLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(RepoLayout::Global),
            "per-anime" | "per_anime" => Ok(RepoLayout::PerAnime),
            other => Err(format!("unknown repo layout: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_repo_ignores_anime() {
        let policy = RepoLayout::Global.policy(DEFAULT_REPO_NAME);
        assert_eq!(policy.repo_id("alice", 1), "alice/weaboo-storage");
        assert_eq!(policy.repo_id("alice", 999), "alice/weaboo-storage");
    }

    #[test]
    fn test_repo_per_anime() {
        let policy = RepoLayout::PerAnime.policy("anime");
        assert_eq!(policy.repo_id("bob", 21), "bob/anime-21");
    }

    #[test]
    fn test_layout_parse() {
        assert_eq!("GLOBAL".parse::<RepoLayout>().unwrap(), RepoLayout::Global);
        assert_eq!("per-anime".parse::<RepoLayout>().unwrap(), RepoLayout::PerAnime);
        tokio_test::assert_err!("sharded".parse::<RepoLayout>());
    }
}
