//! Centralized constants for file names, permissions, and provider defaults.

/// Configuration file looked up in the state root.
pub const CONFIG_FILE_NAME: &str = "gha-aws-creds.toml";

/// Environment variable overriding the state root.
pub const ROOT_ENV: &str = "GHA_AWS_CREDS_ROOT";

/// Permission mode for local access key records.
pub const RECORD_FILE_MODE: u32 = 0o600;

/// Permission mode for the config file written by `init`.
pub const CONFIG_FILE_MODE: u32 = 0o640;

/// Permission mode for the audit log.
pub const AUDIT_LOG_MODE: u32 = 0o640;

/// Permission mode for the node counter directory.
pub const COUNTERS_DIR_MODE: u32 = 0o700;

/// Environment variable holding the GitHub token unless a project overrides it.
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Default repository secret names for the mirrored credentials.
pub const DEFAULT_SECRET_REGION: &str = "AWS_DEFAULT_REGION";
pub const DEFAULT_SECRET_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const DEFAULT_SECRET_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

/// GitHub REST API endpoint and pinned API version.
pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const GITHUB_API_VERSION: &str = "2022-11-28";

/// Policy document version accepted by IAM.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Placeholders substituted into policy resources at render time.
pub const PLACEHOLDER_REGION: &str = "${aws_region}";
pub const PLACEHOLDER_ACCOUNT_ID: &str = "${aws_account_id}";

/// IAM user names: 1..=64 chars of `[A-Za-z0-9+=,.@_-]`.
pub const MAX_IAM_USER_NAME_LEN: usize = 64;
