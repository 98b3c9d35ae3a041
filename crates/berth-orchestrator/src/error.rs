use std::fmt;

use thiserror::Error;

use crate::cluster::ClusterError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// A named step of the create, update or delete protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    CreateVolume,
    CreateClaim,
    CreateWorkload,
    CreateService,
    ReadAssignedPort,
    UpdateWorkload,
    ResizeVolume,
    ResizeClaim,
    UpdateServicePort,
    DeleteVolume,
    DeleteClaim,
    DeleteService,
    DeleteWorkload,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::CreateVolume => "create-volume",
            Step::CreateClaim => "create-claim",
            Step::CreateWorkload => "create-workload",
            Step::CreateService => "create-service",
            Step::ReadAssignedPort => "read-assigned-port",
            Step::UpdateWorkload => "update-workload",
            Step::ResizeVolume => "resize-volume",
            Step::ResizeClaim => "resize-claim",
            Step::UpdateServicePort => "update-service-port",
            Step::DeleteVolume => "delete-volume",
            Step::DeleteClaim => "delete-claim",
            Step::DeleteService => "delete-service",
            Step::DeleteWorkload => "delete-workload",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an orchestrator protocol. Every variant names the step that
/// failed; steps before it completed, steps after it were not attempted.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("step {step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: ClusterError,
    },

    #[error("step {step} still conflicting after {attempts} attempts")]
    RetryExhausted { step: Step, attempts: u32 },

    #[error("step {step}: service {service} has no assigned node port")]
    MissingNodePort { step: Step, service: String },
}

impl OrchestratorError {
    pub fn step(&self) -> Step {
        match self {
            OrchestratorError::Step { step, .. }
            | OrchestratorError::RetryExhausted { step, .. }
            | OrchestratorError::MissingNodePort { step, .. } => *step,
        }
    }

    /// True when the failing call found no object to act on.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::Step { source, .. } if source.is_not_found())
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, OrchestratorError::RetryExhausted { .. })
    }

    /// The underlying control-plane error, when there is one.
    pub fn cluster_error(&self) -> Option<&ClusterError> {
        match self {
            OrchestratorError::Step { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Attach a step to a control-plane result.
pub(crate) trait AtStep<T> {
    fn at(self, step: Step) -> OrchestratorResult<T>;
}

impl<T> AtStep<T> for Result<T, ClusterError> {
    fn at(self, step: Step) -> OrchestratorResult<T> {
        self.map_err(|source| OrchestratorError::Step { step, source })
    }
}
