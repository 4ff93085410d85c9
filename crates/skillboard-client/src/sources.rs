//! Presets for the upstream profile sources SkillBoard knows about.

use std::time::Duration;

use skillboard_core::config::OrchestratorConfig;
use skillboard_core::error::AppError;

use crate::upstream::{HttpUpstream, RequestStyle};

/// Names accepted by [`SourceProfile::by_name`].
pub const SOURCE_NAMES: [&str; 4] = ["codechef", "leetcode", "github", "codeforces"];

const LEETCODE_PROFILE_QUERY: &str = r#"query userPublicProfile($username: String!) {
  matchedUser(username: $username) {
    username
    profile { realName userAvatar ranking countryName reputation }
    submitStats { acSubmissionNum { difficulty count } }
    badges { id displayName icon creationDate }
  }
  userContestRanking(username: $username) {
    attendedContestsCount
    rating
    globalRanking
    topPercentage
  }
}"#;

/// Everything needed to talk to one upstream: request style, default
/// mirrors, extra headers and an optional token variable.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub name: &'static str,
    pub style: RequestStyle,
    pub endpoints: Vec<String>,
    pub headers: Vec<(String, String)>,
    /// Environment variable holding a bearer token, if the source takes one.
    pub token_env: Option<&'static str>,
}

impl SourceProfile {
    pub fn codechef() -> Self {
        Self {
            name: "codechef",
            style: RequestStyle::Rest,
            endpoints: vec!["https://codechef-api.vercel.app/handle/{id}".into()],
            headers: Vec::new(),
            token_env: None,
        }
    }

    pub fn leetcode() -> Self {
        Self {
            name: "leetcode",
            style: RequestStyle::GraphQl {
                query: LEETCODE_PROFILE_QUERY.into(),
            },
            endpoints: vec!["https://leetcode.com/graphql".into()],
            headers: vec![
                ("Referer".into(), "https://leetcode.com/".into()),
                ("Origin".into(), "https://leetcode.com".into()),
            ],
            token_env: None,
        }
    }

    pub fn github() -> Self {
        Self {
            name: "github",
            style: RequestStyle::Rest,
            endpoints: vec!["https://api.github.com/users/{id}".into()],
            headers: vec![
                ("Accept".into(), "application/vnd.github+json".into()),
                ("X-GitHub-Api-Version".into(), "2022-11-28".into()),
            ],
            token_env: Some("GITHUB_TOKEN"),
        }
    }

    pub fn codeforces() -> Self {
        Self {
            name: "codeforces",
            style: RequestStyle::Rest,
            endpoints: vec!["https://codeforces.com/api/user.info?handles={id}".into()],
            headers: Vec::new(),
            token_env: None,
        }
    }

    /// Look up a preset by name, case-insensitively.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "codechef" => Some(Self::codechef()),
            "leetcode" => Some(Self::leetcode()),
            "github" => Some(Self::github()),
            "codeforces" => Some(Self::codeforces()),
            _ => None,
        }
    }

    pub fn all() -> Vec<Self> {
        SOURCE_NAMES.iter().filter_map(|name| Self::by_name(name)).collect()
    }

    /// Orchestrator configuration for this source, with environment overrides.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, AppError> {
        OrchestratorConfig::from_env(self.name, self.endpoints.clone())
    }

    /// HTTP client for this source. The token is read from the environment.
    pub fn upstream(&self, timeout: Duration) -> Result<HttpUpstream, AppError> {
        let token = self.token_env.and_then(|var| std::env::var(var).ok());
        self.upstream_with_token(timeout, token)
    }

    pub fn upstream_with_token(
        &self,
        timeout: Duration,
        token: Option<String>,
    ) -> Result<HttpUpstream, AppError> {
        let mut upstream = HttpUpstream::new(self.style.clone())?.with_timeout(timeout)?;
        for (name, value) in &self.headers {
            upstream = upstream.with_header(name.clone(), value.clone());
        }
        match token.filter(|t| !t.trim().is_empty()) {
            Some(token) => Ok(upstream.with_bearer_token(token)),
            None => {
                if let Some(var) = self.token_env {
                    tracing::info!(source = self.name, "{var} not set, using unauthenticated requests");
                }
                Ok(upstream)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_resolves() {
        for name in SOURCE_NAMES {
            let profile = SourceProfile::by_name(name).unwrap();
            assert_eq!(profile.name, name);
            assert!(!profile.endpoints.is_empty());
        }
        assert_eq!(SourceProfile::all().len(), 4);
        assert_eq!(SourceProfile::by_name(" GitHub ").unwrap().name, "github");
        assert!(SourceProfile::by_name("hackerrank").is_none());
    }

    #[test]
    fn test_rest_templates_have_placeholder() {
        for profile in SourceProfile::all() {
            if profile.style == RequestStyle::Rest {
                for endpoint in &profile.endpoints {
                    assert!(endpoint.contains("{id}"), "{endpoint}");
                }
            }
        }
    }

    #[test]
    fn test_leetcode_is_graphql() {
        match SourceProfile::leetcode().style {
            RequestStyle::GraphQl { query } => assert!(query.contains("$username")),
            RequestStyle::Rest => panic!("leetcode should use GraphQL"),
        }
    }

    #[test]
    fn test_codechef_has_no_unverified_backup_mirror() {
        assert_eq!(SourceProfile::codechef().endpoints.len(), 1);
    }

    #[test]
    fn test_upstream_builds_with_and_without_token() {
        let profile = SourceProfile::github();
        assert!(
            profile
                .upstream_with_token(Duration::from_secs(5), Some("tok".into()))
                .is_ok()
        );
        assert!(
            profile
                .upstream_with_token(Duration::from_secs(5), None)
                .is_ok()
        );
    }
}
