//! Credential resolution
//!
//! Decides which database user and password a project connects with. When a
//! project's stored credentials are missing or incomplete, administrative
//! credentials derived from the environment are substituted and the event is
//! recorded in the [`FallbackLedger`].

pub mod ledger;

pub use ledger::{CredentialType, FallbackLedger, FallbackUsageEntry, FallbackUsageStats};

use crate::config::EnvironmentConfigProvider;
use crate::connection_string::{
    build_connection_string, BuildOptions, ConnectionTarget, Password, DEFAULT_PORT,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Last-resort credentials used when the environment cannot supply any
pub const DEFAULT_FALLBACK_USER: &str = "postgres";
pub const DEFAULT_FALLBACK_PASSWORD: &str = "postgres";

const DEFAULT_HOST: &str = "localhost";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Project '{project_ref}' has incomplete database credentials and fallback is disabled: {reason}")]
    FallbackDisabled { project_ref: String, reason: String },
}

/// A project's own database credentials, normalized at the boundary
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProjectCredentials {
    pub user: Option<String>,
    pub password_hash: Option<String>,
}

impl ProjectCredentials {
    /// Both fields present and non-blank
    pub fn is_complete(&self) -> bool {
        self.missing().is_none()
    }

    /// Which part is absent, if any
    pub fn missing(&self) -> Option<CredentialType> {
        match (present(self.user.as_deref()), present(self.password_hash.as_deref())) {
            (true, true) => None,
            (false, true) => Some(CredentialType::User),
            (true, false) => Some(CredentialType::Password),
            (false, false) => Some(CredentialType::Both),
        }
    }
}

impl fmt::Debug for ProjectCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectCredentials")
            .field("user", &self.user)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "****"))
            .field("is_complete", &self.is_complete())
            .finish()
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Normalize raw stored credentials; blank values count as absent
pub fn get_project_credentials(
    project_ref: &str,
    raw_user: Option<&str>,
    raw_password: Option<&str>,
) -> ProjectCredentials {
    let credentials = ProjectCredentials {
        user: normalize(raw_user),
        password_hash: normalize(raw_password),
    };
    debug!(
        project_ref,
        is_complete = credentials.is_complete(),
        "Resolved project credentials"
    );
    credentials
}

/// True unless both fields are present and non-blank.
///
/// Fields are rechecked here, so values built by hand rather than through
/// [`get_project_credentials`] are judged the same way.
pub fn should_use_fallback(credentials: Option<&ProjectCredentials>) -> bool {
    !credentials.is_some_and(ProjectCredentials::is_complete)
}

fn present(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Environment,
    Default,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Default => write!(f, "default"),
        }
    }
}

/// Administrative credentials; `user` and `password` are never empty
#[derive(Clone, PartialEq, Eq)]
pub struct FallbackCredentials {
    pub user: String,
    pub password: String,
    pub source: CredentialSource,
}

impl FallbackCredentials {
    fn defaults() -> Self {
        Self {
            user: DEFAULT_FALLBACK_USER.to_string(),
            password: DEFAULT_FALLBACK_PASSWORD.to_string(),
            source: CredentialSource::Default,
        }
    }
}

impl fmt::Debug for FallbackCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackCredentials")
            .field("user", &self.user)
            .field("password", &"****")
            .field("source", &self.source)
            .finish()
    }
}

/// Input to [`CredentialResolver::generate_connection_string_with_fallback`]
#[derive(Debug, Clone)]
pub struct ConnectionStringRequest {
    pub database_name: String,
    pub project_ref: String,
    pub project_credentials: Option<ProjectCredentials>,
    pub read_only: bool,
    /// Skip project credentials and connect as the environment user
    pub use_environment_defaults: bool,
    pub allow_fallback: bool,
    pub log_fallback_usage: bool,
    pub mask_password: bool,
}

impl ConnectionStringRequest {
    pub fn new(database_name: impl Into<String>, project_ref: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            project_ref: project_ref.into(),
            project_credentials: None,
            read_only: false,
            use_environment_defaults: false,
            allow_fallback: true,
            log_fallback_usage: true,
            mask_password: false,
        }
    }
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedConnectionString {
    pub connection_string: String,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl fmt::Debug for GeneratedConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedConnectionString")
            .field("connection_string", &"<redacted>")
            .field("used_fallback", &self.used_fallback)
            .field("fallback_reason", &self.fallback_reason)
            .finish()
    }
}

/// Resolves effective credentials and composes connection strings
pub struct CredentialResolver {
    provider: Arc<dyn EnvironmentConfigProvider>,
    ledger: Arc<FallbackLedger>,
}

impl CredentialResolver {
    pub fn new(provider: Arc<dyn EnvironmentConfigProvider>, ledger: Arc<FallbackLedger>) -> Self {
        Self { provider, ledger }
    }

    pub fn ledger(&self) -> &Arc<FallbackLedger> {
        &self.ledger
    }

    /// Administrative credentials for read-write or read-only access
    pub async fn get_fallback_credentials(&self, read_only: bool) -> FallbackCredentials {
        let env = match self.provider.current_config().await {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, read_only, "Environment configuration lookup failed, using built-in default credentials");
                return FallbackCredentials::defaults();
            }
        };

        let user = if read_only {
            env.postgres_user_read_only.trim()
        } else {
            env.postgres_user_read_write.trim()
        };
        let password = env.postgres_password.trim();

        if user.is_empty() || password.is_empty() {
            warn!(read_only, "Environment database credentials are blank, using built-in defaults");
            return FallbackCredentials::defaults();
        }

        FallbackCredentials {
            user: user.to_string(),
            password: password.to_string(),
            source: CredentialSource::Environment,
        }
    }

    /// Host, port and TLS requirement of the database server
    async fn server_endpoint(&self) -> (String, u16, bool) {
        match self.provider.current_config().await {
            Ok(env) if !env.postgres_host.trim().is_empty() => {
                (env.postgres_host.trim().to_string(), env.postgres_port, env.ssl_required())
            }
            Ok(env) => (DEFAULT_HOST.to_string(), env.postgres_port, env.ssl_required()),
            Err(_) => (DEFAULT_HOST.to_string(), DEFAULT_PORT, false),
        }
    }

    /// Resolve credentials for a project and render its connection string
    pub async fn generate_connection_string_with_fallback(
        &self,
        request: ConnectionStringRequest,
    ) -> Result<GeneratedConnectionString, CredentialError> {
        let project_credentials = request
            .project_credentials
            .as_ref()
            .filter(|c| !should_use_fallback(Some(*c)));

        let (user, password, fallback_reason) = if request.use_environment_defaults {
            let creds = self.get_fallback_credentials(request.read_only).await;
            (creds.user, creds.password, None)
        } else if let Some(creds) = project_credentials {
            (
                creds.user.clone().unwrap_or_default(),
                creds.password_hash.clone().unwrap_or_default(),
                None,
            )
        } else {
            let missing = request
                .project_credentials
                .as_ref()
                .and_then(ProjectCredentials::missing)
                .unwrap_or(CredentialType::Both);
            let reason = describe_missing(request.project_credentials.as_ref(), missing);

            if !request.allow_fallback {
                if request.log_fallback_usage {
                    self.ledger
                        .log_fallback_usage(
                            &request.project_ref,
                            format!("{} (fallback disabled)", reason),
                            missing,
                        )
                        .await;
                }
                return Err(CredentialError::FallbackDisabled {
                    project_ref: request.project_ref,
                    reason,
                });
            }

            let creds = self.get_fallback_credentials(request.read_only).await;
            if request.log_fallback_usage {
                self.ledger
                    .log_fallback_usage(&request.project_ref, reason.clone(), missing)
                    .await;
            }
            info!(
                project_ref = %request.project_ref,
                source = %creds.source,
                read_only = request.read_only,
                "Using fallback database credentials"
            );
            (creds.user, creds.password, Some(reason))
        };

        let (host, port, ssl_required) = self.server_endpoint().await;

        let mut target = ConnectionTarget::new(
            host,
            port,
            user,
            Password::Plain(password),
            request.database_name,
        );
        target.read_only = request.read_only;
        target.ssl_required = ssl_required;

        Ok(GeneratedConnectionString {
            connection_string: build_connection_string(
                &target,
                BuildOptions {
                    mask: request.mask_password,
                },
            ),
            used_fallback: fallback_reason.is_some(),
            fallback_reason,
        })
    }
}

fn describe_missing(credentials: Option<&ProjectCredentials>, missing: CredentialType) -> String {
    match (credentials, missing) {
        (None, _) => "No database credentials stored for project".to_string(),
        (Some(_), CredentialType::User) => "Project database user is missing".to_string(),
        (Some(_), CredentialType::Password) => "Project database password is missing".to_string(),
        (Some(_), CredentialType::Both) => "Project database user and password are missing".to_string(),
    }
}
