//! Console runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the console
//! services. Library code never reads process environment variables during request handling;
//! binaries call [`ConsoleConfig::from_env`] (after `dotenvy`) and tests build the config from
//! an explicit lookup.

use crate::constants::{
    DEFAULT_CONSOLE_USER_ID, DEFAULT_DOCUMENT_DIR, DEFAULT_LOCAL_STATE_FILE,
    DEFAULT_MIGRATION_LOG_DIR, DEFAULT_SERVER_URL, DEFAULT_USER_ROLE,
};
use crate::{ConsoleError, ConsoleResult};
use std::path::{Path, PathBuf};

/// Which transport satisfies the data-access contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Rest,
    Document,
}

impl std::str::FromStr for BackendKind {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Ok(BackendKind::Rest),
            "document" | "documents" => Ok(BackendKind::Document),
            other => Err(ConsoleError::Config(format!(
                "NUTRI_DATA_BACKEND must be 'rest' or 'document', got '{other}'"
            ))),
        }
    }
}

/// Connection settings for the REST proxy.
#[derive(Clone, Debug)]
pub struct RestSettings {
    pub base_url: String,
    pub app_id: String,
    pub access_token: Option<String>,
    pub functions_version: Option<String>,
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct ConsoleConfig {
    backend: BackendKind,
    rest: Option<RestSettings>,
    document_dir: PathBuf,
    local_state_file: PathBuf,
    ai_endpoint_url: Option<String>,
    ai_endpoint_token: Option<String>,
    default_user_role: String,
    console_user_id: String,
    migration_log_dir: PathBuf,
}

impl ConsoleConfig {
    /// Resolve the configuration from process environment variables.
    pub fn from_env() -> ConsoleResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration from an arbitrary key lookup.
    ///
    /// Blank values are treated as absent. The REST settings are only required when the
    /// REST backend is selected, but are still parsed when present so the batch tooling
    /// (which always talks REST) can use them.
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError::Config` if the backend name is unknown or the REST backend is
    /// selected without an application id.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConsoleResult<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend = get("NUTRI_DATA_BACKEND")
            .map(|v| v.parse::<BackendKind>())
            .transpose()?
            .unwrap_or(BackendKind::Rest);

        let rest = get("NUTRI_APP_ID").map(|app_id| RestSettings {
            base_url: get("NUTRI_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.into()),
            app_id,
            access_token: get("NUTRI_ACCESS_TOKEN"),
            functions_version: get("NUTRI_FUNCTIONS_VERSION"),
        });

        if backend == BackendKind::Rest && rest.is_none() {
            return Err(ConsoleError::Config(
                "NUTRI_APP_ID is required when NUTRI_DATA_BACKEND=rest".into(),
            ));
        }

        Ok(Self {
            backend,
            rest,
            document_dir: get("NUTRI_DOCUMENT_DIR")
                .unwrap_or_else(|| DEFAULT_DOCUMENT_DIR.into())
                .into(),
            local_state_file: get("NUTRI_LOCAL_STATE")
                .unwrap_or_else(|| DEFAULT_LOCAL_STATE_FILE.into())
                .into(),
            ai_endpoint_url: get("NUTRI_AI_ENDPOINT_URL"),
            ai_endpoint_token: get("NUTRI_AI_ENDPOINT_TOKEN"),
            default_user_role: get("NUTRI_DEFAULT_USER_ROLE")
                .unwrap_or_else(|| DEFAULT_USER_ROLE.into()),
            console_user_id: get("NUTRI_CONSOLE_USER_ID")
                .unwrap_or_else(|| DEFAULT_CONSOLE_USER_ID.into()),
            migration_log_dir: get("NUTRI_MIGRATION_LOG_DIR")
                .unwrap_or_else(|| DEFAULT_MIGRATION_LOG_DIR.into())
                .into(),
        })
    }

    /// Configuration for an in-process document store, used by tests and local tooling.
    pub fn document(document_dir: PathBuf, local_state_file: PathBuf) -> Self {
        Self {
            backend: BackendKind::Document,
            rest: None,
            document_dir,
            local_state_file,
            ai_endpoint_url: None,
            ai_endpoint_token: None,
            default_user_role: DEFAULT_USER_ROLE.into(),
            console_user_id: DEFAULT_CONSOLE_USER_ID.into(),
            migration_log_dir: DEFAULT_MIGRATION_LOG_DIR.into(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn rest(&self) -> Option<&RestSettings> {
        self.rest.as_ref()
    }

    /// REST settings, or a configuration error naming the missing key.
    pub fn require_rest(&self) -> ConsoleResult<&RestSettings> {
        self.rest
            .as_ref()
            .ok_or_else(|| ConsoleError::Config("NUTRI_APP_ID is not set".into()))
    }

    pub fn document_dir(&self) -> &Path {
        &self.document_dir
    }

    pub fn local_state_file(&self) -> &Path {
        &self.local_state_file
    }

    pub fn ai_endpoint_url(&self) -> Option<&str> {
        self.ai_endpoint_url.as_deref()
    }

    pub fn ai_endpoint_token(&self) -> Option<&str> {
        self.ai_endpoint_token.as_deref()
    }

    pub fn default_user_role(&self) -> &str {
        &self.default_user_role
    }

    pub fn console_user_id(&self) -> &str {
        &self.console_user_id
    }

    pub fn migration_log_dir(&self) -> &Path {
        &self.migration_log_dir
    }
}
