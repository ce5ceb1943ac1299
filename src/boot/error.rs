use thiserror::Error;

/// The sub-step of a boot pool operation that a collaborator failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ListDisks,
    InspectMember,
    Format,
    QueryTopology,
    Extend,
    Online,
    Replace,
    Detach,
    Scrub,
    DetectBootType,
    ReadScrubInterval,
    WriteScrubInterval,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Step::ListDisks => "listing boot pool disks",
            Step::InspectMember => "inspecting existing member",
            Step::Format => "formatting new disk",
            Step::QueryTopology => "querying pool topology",
            Step::Extend => "extending pool",
            Step::Online => "onlining new member",
            Step::Replace => "replacing member",
            Step::Detach => "detaching member",
            Step::Scrub => "scrubbing pool",
            Step::DetectBootType => "detecting boot type",
            Step::ReadScrubInterval => "reading scrub interval",
            Step::WriteScrubInterval => "writing scrub interval",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum BootError {
    #[error("3-way mirror not supported (boot pool already has {members} disks)")]
    UnsupportedTopology { members: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A pool engine, disk inventory or settings call failed. Steps that
    /// completed before it are not rolled back.
    #[error("{step} failed: {source:#}")]
    Dependency {
        step: Step,
        #[source]
        source: anyhow::Error,
    },

    #[error("Boot pool name was not resolved at startup")]
    UnresolvedPool,

    #[error("This operation requires root privileges")]
    PrivilegeRequired,
}

impl BootError {
    pub fn dependency(step: Step) -> impl FnOnce(anyhow::Error) -> BootError {
        move |source| BootError::Dependency { step, source }
    }

    /// The step that failed, for dependency failures.
    pub fn step(&self) -> Option<Step> {
        match self {
            BootError::Dependency { step, .. } => Some(*step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_message_names_the_step() {
        let err = BootError::dependency(Step::Extend)(anyhow::anyhow!("device is busy"));
        assert_eq!(err.to_string(), "extending pool failed: device is busy");
        assert_eq!(err.step(), Some(Step::Extend));
    }

    #[test]
    fn dependency_keeps_context_chain() {
        let source = anyhow::anyhow!("exit code 1").context("`zpool attach` failed");
        let err = BootError::dependency(Step::Extend)(source);
        assert!(err.to_string().contains("`zpool attach` failed: exit code 1"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
