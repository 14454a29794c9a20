//! Per-call execution state machine.

/// Phase of a single `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionPhase {
    /// Call received, nothing checked yet.
    #[default]
    Idle,
    /// Command is being validated and classified.
    Validating,
    /// Command is being written to the channel.
    Sending,
    /// Waiting for output to go quiet.
    Draining,
    /// Stripping echo and prompt artifacts.
    Cleaning,
    /// Finished with output.
    Done,
    /// Refused at validation (editor redirect, unsupported or invalid).
    Rejected,
}

impl ExecutionPhase {
    /// Check if transition to target phase is valid.
    ///
    /// Valid transitions:
    /// - Idle -> Validating
    /// - Validating -> Sending
    /// - Validating -> Rejected
    /// - Sending -> Draining
    /// - Draining -> Cleaning
    /// - Cleaning -> Done
    pub fn can_transition_to(&self, target: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        matches!(
            (*self, target),
            (Idle, Validating)
                | (Validating, Sending)
                | (Validating, Rejected)
                | (Sending, Draining)
                | (Draining, Cleaning)
                | (Cleaning, Done)
        )
    }

    /// Attempt to transition to a new phase.
    pub fn transition_to(&mut self, target: ExecutionPhase) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::BridgeError::InvalidPhaseTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionPhase::Done | ExecutionPhase::Rejected)
    }

    /// Whether the channel may be touched in this phase.
    pub fn uses_channel(&self) -> bool {
        matches!(self, ExecutionPhase::Sending | ExecutionPhase::Draining)
    }
}
