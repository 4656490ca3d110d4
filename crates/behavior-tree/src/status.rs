//! Status returned by behavior nodes and abort classification for
//! conditional decorators.

/// The result of running a behavior node for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The behavior completed successfully.
    ///
    /// For conditions: The condition was met.
    /// For actions: The action finished without errors.
    Success,

    /// The behavior failed.
    ///
    /// For conditions: The condition was not met.
    /// For actions: The action could not be carried out.
    Failure,

    /// The behavior needs more ticks to finish.
    ///
    /// `Running` is an ordinary return value, not a suspension: the node
    /// stays on the execution stack and is run again next tick.
    Running,
}

impl Status {
    /// Returns `true` if this status is `Success`.
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }

    /// Returns `true` if this status is `Failure`.
    #[inline]
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Failure)
    }

    /// Returns `true` for `Success` and `Failure`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Running)
    }

    /// Inverts the status: Success becomes Failure and vice versa.
    ///
    /// `Running` is unaffected; only terminal results can be negated.
    #[inline]
    pub fn invert(self) -> Self {
        match self {
            Status::Success => Status::Failure,
            Status::Failure => Status::Success,
            Status::Running => Status::Running,
        }
    }
}

/// How a conditional decorator may preempt running branches when the truth
/// value of its condition flips between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AbortType {
    /// The condition is checked only on entry; no observation afterwards.
    #[default]
    None,

    /// While the conditional's own branch runs, a condition that turns false
    /// aborts that branch and re-enters at the conditional.
    SelfBranch,

    /// While a lower-priority sibling branch runs, a condition that turns
    /// true aborts that sibling and re-enters at the conditional's branch.
    LowerPriority,

    /// Combines [`AbortType::SelfBranch`] and [`AbortType::LowerPriority`].
    Both,
}

impl AbortType {
    /// Whether the condition is re-polled at all after entry.
    #[inline]
    pub fn observes(self) -> bool {
        !matches!(self, AbortType::None)
    }

    /// Whether a false condition may abort the conditional's own branch.
    #[inline]
    pub fn aborts_self(self) -> bool {
        matches!(self, AbortType::SelfBranch | AbortType::Both)
    }

    /// Whether a true condition may abort lower-priority sibling branches.
    ///
    /// Observation with this flag outlives the conditional's own activation:
    /// the record is kept until the governing composite exits.
    #[inline]
    pub fn aborts_lower_priority(self) -> bool {
        matches!(self, AbortType::LowerPriority | AbortType::Both)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_swaps_terminal_statuses() {
        assert_eq!(Status::Success.invert(), Status::Failure);
        assert_eq!(Status::Failure.invert(), Status::Success);
        assert_eq!(Status::Running.invert(), Status::Running);
    }

    #[test]
    fn running_is_not_terminal() {
        assert!(Status::Success.is_terminal());
        assert!(Status::Failure.is_terminal());
        assert!(!Status::Running.is_terminal());
    }

    #[test]
    fn abort_type_classification() {
        assert!(!AbortType::None.observes());
        assert!(AbortType::SelfBranch.aborts_self());
        assert!(!AbortType::SelfBranch.aborts_lower_priority());
        assert!(AbortType::LowerPriority.aborts_lower_priority());
        assert!(AbortType::Both.aborts_self());
        assert!(AbortType::Both.aborts_lower_priority());
    }
}
