//! Spawn-environment sanitization for upstream server processes.
//!
//! The proxy inherits its parent environment when spawning upstream
//! servers. Credential-bearing variables must not leak into child
//! processes the operator never vetted, so the inherited set is filtered
//! through a blocklist of name patterns before the spawn. Variables the
//! operator explicitly supplies in a server's configuration are merged in
//! afterwards, unfiltered: operator intent overrides the blocklist.
//!
//! All spawn sites MUST use [`sanitize_environment`] rather than
//! maintaining inline blocklists.

use regex::RegexSet;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Name patterns for env vars that carry credentials.
///
/// Matching is case-insensitive and anchored over the whole variable name.
const BLOCKED_NAME_PATTERNS: &[&str] = &[
    // Cloud and SaaS vendor credentials
    r"^AWS_(ACCESS_KEY_ID|SECRET_ACCESS_KEY|SESSION_TOKEN)$",
    r"^GOOGLE_(API_KEY|APPLICATION_CREDENTIALS)$",
    r"^AZURE_(CLIENT_SECRET|TENANT_ID|CLIENT_ID)$",
    r"^(GITHUB|GITLAB|GH|GL)_(TOKEN|API_TOKEN|ACCESS_TOKEN)$",
    r"^(OPENAI|ANTHROPIC|COHERE|MISTRAL|GROQ)_API_KEY$",
    r"^STRIPE_(SECRET|API)_KEY$",
    r"^SLACK_(BOT_TOKEN|APP_TOKEN|WEBHOOK_URL)$",
    r"^(NPM|PYPI|CARGO_REGISTRY)_TOKEN$",
    r"^TWILIO_AUTH_TOKEN$",
    r"^SENDGRID_API_KEY$",
    // Database URLs routinely embed credentials
    r"^(DATABASE|POSTGRES|MYSQL|MONGODB|REDIS)_(URL|URI|CONNECTION_STRING)$",
    // Auth material
    r"^(JWT|SESSION|AUTH|COOKIE)_SECRET$",
    // Generic suffixes
    r"_(SECRET|PASSWORD|PASSWD|PRIVATE_KEY|API_KEY|ACCESS_TOKEN|REFRESH_TOKEN|AUTH_TOKEN)$",
    // Generic prefixes
    r"^(SECRET|PASSWORD|CREDENTIAL|PRIVATE)_",
];

static BLOCKED_NAMES: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(
        BLOCKED_NAME_PATTERNS
            .iter()
            .map(|p| format!("(?i){p}")),
    )
    .expect("invalid spawn-env blocklist pattern")
});

/// Returns `true` if `key` names a credential-bearing variable that must
/// not be inherited by spawned upstream servers.
#[must_use]
pub fn is_blocked_spawn_env(key: &str) -> bool {
    BLOCKED_NAMES.is_match(key)
}

/// Filter an inherited environment through the blocklist, then merge in
/// operator-supplied overrides unfiltered.
///
/// `inherited` is typically `std::env::vars()`; `overrides` is the `env`
/// map from the server's configuration entry.
#[must_use]
pub fn sanitize_environment(
    inherited: impl IntoIterator<Item = (String, String)>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = inherited
        .into_iter()
        .filter(|(key, _)| !is_blocked_spawn_env(key))
        .collect();

    for (key, value) in overrides {
        env.insert(key.clone(), value.clone());
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_credentials_are_blocked() {
        assert!(is_blocked_spawn_env("AWS_SECRET_ACCESS_KEY"));
        assert!(is_blocked_spawn_env("AWS_SESSION_TOKEN"));
        assert!(is_blocked_spawn_env("GITHUB_TOKEN"));
        assert!(is_blocked_spawn_env("GITLAB_ACCESS_TOKEN"));
        assert!(is_blocked_spawn_env("OPENAI_API_KEY"));
        assert!(is_blocked_spawn_env("ANTHROPIC_API_KEY"));
        assert!(is_blocked_spawn_env("STRIPE_SECRET_KEY"));
        assert!(is_blocked_spawn_env("SLACK_BOT_TOKEN"));
        assert!(is_blocked_spawn_env("NPM_TOKEN"));
        assert!(is_blocked_spawn_env("TWILIO_AUTH_TOKEN"));
        assert!(is_blocked_spawn_env("SENDGRID_API_KEY"));
    }

    #[test]
    fn database_urls_are_blocked() {
        assert!(is_blocked_spawn_env("DATABASE_URL"));
        assert!(is_blocked_spawn_env("POSTGRES_CONNECTION_STRING"));
        assert!(is_blocked_spawn_env("MONGODB_URI"));
        assert!(is_blocked_spawn_env("REDIS_URL"));
    }

    #[test]
    fn generic_suffixes_and_prefixes_are_blocked() {
        assert!(is_blocked_spawn_env("MYAPP_SECRET"));
        assert!(is_blocked_spawn_env("DB_PASSWORD"));
        assert!(is_blocked_spawn_env("SERVICE_PRIVATE_KEY"));
        assert!(is_blocked_spawn_env("FOO_API_KEY"));
        assert!(is_blocked_spawn_env("BAR_ACCESS_TOKEN"));
        assert!(is_blocked_spawn_env("BAZ_REFRESH_TOKEN"));
        assert!(is_blocked_spawn_env("SECRET_SAUCE"));
        assert!(is_blocked_spawn_env("PASSWORD_FILE"));
        assert!(is_blocked_spawn_env("CREDENTIAL_STORE"));
        assert!(is_blocked_spawn_env("PRIVATE_REGISTRY"));
        assert!(is_blocked_spawn_env("JWT_SECRET"));
        assert!(is_blocked_spawn_env("SESSION_SECRET"));
    }

    #[test]
    fn case_insensitive_matching() {
        assert!(is_blocked_spawn_env("github_token"));
        assert!(is_blocked_spawn_env("Database_Url"));
        assert!(is_blocked_spawn_env("myapp_secret"));
    }

    #[test]
    fn benign_vars_pass_through() {
        assert!(!is_blocked_spawn_env("PATH"));
        assert!(!is_blocked_spawn_env("HOME"));
        assert!(!is_blocked_spawn_env("LANG"));
        assert!(!is_blocked_spawn_env("TERM"));
        assert!(!is_blocked_spawn_env("EDITOR"));
        assert!(!is_blocked_spawn_env("MY_APP_ENV"));
        // "SECRETARY" starts with SECRET but not the SECRET_ prefix.
        assert!(!is_blocked_spawn_env("SECRETARY"));
    }

    #[test]
    fn sanitize_filters_then_merges_overrides() {
        let inherited = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("GITHUB_TOKEN".to_string(), "ghp_abc".to_string()),
            ("LANG".to_string(), "C".to_string()),
        ];
        let mut overrides = HashMap::new();
        // Operator explicitly grants the token back: their intent wins.
        overrides.insert("GITHUB_TOKEN".to_string(), "ghp_operator".to_string());

        let env = sanitize_environment(inherited, &overrides);

        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(
            env.get("GITHUB_TOKEN").map(String::as_str),
            Some("ghp_operator")
        );
    }

    #[test]
    fn sanitize_without_overrides_drops_credentials() {
        let inherited = vec![
            ("DATABASE_URL".to_string(), "postgres://u:p@h/db".to_string()),
            ("TERM".to_string(), "xterm".to_string()),
        ];
        let env = sanitize_environment(inherited, &HashMap::new());
        assert!(!env.contains_key("DATABASE_URL"));
        assert!(env.contains_key("TERM"));
    }
}
