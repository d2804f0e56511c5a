use tonic::Status;

/// Error taxonomy of the orchestrator. Deploy-time failures are fully
/// recovered (partial state removed) before one of these is returned;
/// post-start runtime failures are recorded on the bot row instead.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("{0}")]
    Validation(String),

    #[error("no {runtime} dependency manifest found in archive (found: {found})")]
    ManifestNotFound { runtime: &'static str, found: String },

    #[error("no entry point found under the manifest directory (expected one of: {expected})")]
    EntryPointNotFound { expected: String },

    #[error("dependency install failed: {output}")]
    DependencyInstall { output: String },

    #[error("failed to spawn bot process: {0}")]
    Spawn(String),

    #[error("access denied: {0}")]
    AccessDenied(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("bot is already running")]
    AlreadyRunning,

    #[error("bot files are missing on disk; re-upload the archive")]
    FilesMissing,

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<HostError> for Status {
    fn from(value: HostError) -> Self {
        match &value {
            HostError::Validation(_)
            | HostError::ManifestNotFound { .. }
            | HostError::EntryPointNotFound { .. } => Status::invalid_argument(value.to_string()),
            HostError::DependencyInstall { .. }
            | HostError::Spawn(_)
            | HostError::AlreadyRunning
            | HostError::FilesMissing => Status::failed_precondition(value.to_string()),
            HostError::AccessDenied(_) => Status::permission_denied(value.to_string()),
            HostError::NotFound(_) => Status::not_found(value.to_string()),
            HostError::Db(_) | HostError::Other(_) => Status::internal(value.to_string()),
        }
    }
}
