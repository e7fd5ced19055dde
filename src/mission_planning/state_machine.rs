/*!
 * Episode state machine for the replanning loop
 *
 * One episode runs from an accepted goal to the goal being reached or the
 * episode being aborted. Transitions are a pure function of the current
 * phase and the event produced by the last iteration; the tracker records
 * the history for inspection.
 */

use std::fmt;

use tracing::debug;

/// Why an episode stopped without reaching its goal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Consecutive failed searches exceeded the retry policy
    RetriesExhausted { attempts: u32 },
    /// Too many window-limited segments without reaching the goal
    SegmentLimit { segments: usize },
    /// Unrecoverable fault such as an allocation failure
    Fatal { message: String },
    /// External shutdown request
    Shutdown,
}

impl AbortReason {
    pub fn description(&self) -> String {
        match self {
            AbortReason::RetriesExhausted { attempts } => format!("no path found after {} attempts", attempts),
            AbortReason::SegmentLimit { segments } => format!("goal not reached after {} segments", segments),
            AbortReason::Fatal { message } => format!("fatal: {}", message),
            AbortReason::Shutdown => "shutdown requested".to_string(),
        }
    }
}

/// Phase of the current episode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoopPhase {
    /// No goal received yet
    #[default]
    AwaitingGoal,
    /// Goal accepted, waiting for the first pose
    AwaitingFirstPose,
    /// First search of the episode from the offset start
    Initializing,
    /// Searching from the tail of the global trajectory
    Planning,
    /// A segment was produced and is being appended
    Extending,
    GoalReached,
    Aborted(AbortReason),
}

impl LoopPhase {
    /// Phases in which the loop runs searches
    pub fn is_active(&self) -> bool {
        matches!(self, LoopPhase::Initializing | LoopPhase::Planning | LoopPhase::Extending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopPhase::GoalReached | LoopPhase::Aborted(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopPhase::AwaitingGoal => "AWAITING_GOAL",
            LoopPhase::AwaitingFirstPose => "AWAITING_FIRST_POSE",
            LoopPhase::Initializing => "INITIALIZING",
            LoopPhase::Planning => "PLANNING",
            LoopPhase::Extending => "EXTENDING",
            LoopPhase::GoalReached => "GOAL_REACHED",
            LoopPhase::Aborted(_) => "ABORTED",
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPhase::Aborted(reason) => write!(f, "ABORTED ({})", reason.description()),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Outcome of one loop iteration, fed to [`next_phase`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    GoalAccepted { pose_known: bool },
    PoseReceived,
    /// The search produced a usable segment
    SegmentFound,
    /// The search failed; `retry` says whether the policy allows another attempt
    SearchFailed { retry: bool, attempts: u32 },
    /// The segment was appended to the global trajectory
    SegmentAppended { reached: bool, segment_limit: Option<usize> },
    Fatal(String),
    Shutdown,
}

/// Transition function of the episode state machine
pub fn next_phase(phase: &LoopPhase, event: &LoopEvent) -> LoopPhase {
    use LoopEvent as E;
    use LoopPhase as P;

    match (phase, event) {
        (_, E::Shutdown) => P::Aborted(AbortReason::Shutdown),
        (P::Aborted(AbortReason::Shutdown), _) => phase.clone(),
        (_, E::GoalAccepted { pose_known: true }) => P::Initializing,
        (_, E::GoalAccepted { pose_known: false }) => P::AwaitingFirstPose,
        (P::AwaitingFirstPose, E::PoseReceived) => P::Initializing,
        (P::Initializing | P::Planning, E::SegmentFound) => P::Extending,
        (P::Initializing | P::Planning, E::SearchFailed { retry: true, .. }) => phase.clone(),
        (P::Initializing | P::Planning, E::SearchFailed { retry: false, attempts }) => {
            P::Aborted(AbortReason::RetriesExhausted { attempts: *attempts })
        }
        (P::Extending, E::SegmentAppended { reached: true, .. }) => P::GoalReached,
        (P::Extending, E::SegmentAppended { segment_limit: Some(segments), .. }) => {
            P::Aborted(AbortReason::SegmentLimit { segments: *segments })
        }
        (P::Extending, E::SegmentAppended { .. }) => P::Planning,
        (p, E::Fatal(message)) if !p.is_terminal() => P::Aborted(AbortReason::Fatal { message: message.clone() }),
        _ => phase.clone(),
    }
}

/// Current phase plus the transitions taken so far in this process
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker {
    current: LoopPhase,
    history: Vec<(LoopPhase, LoopEvent, LoopPhase)>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &LoopPhase {
        &self.current
    }

    /// Apply an event; returns the new phase
    pub fn handle(&mut self, event: LoopEvent) -> &LoopPhase {
        let next = next_phase(&self.current, &event);
        if next != self.current {
            debug!("phase {} -> {} on {:?}", self.current, next, event);
        }
        let previous = std::mem::replace(&mut self.current, next);
        self.history.push((previous, event, self.current.clone()));
        &self.current
    }

    pub fn history(&self) -> &[(LoopPhase, LoopEvent, LoopPhase)] {
        &self.history
    }

    /// Phases visited, without repeats of consecutive equal phases
    pub fn visited(&self) -> Vec<LoopPhase> {
        let mut phases = vec![];
        for (from, _, to) in &self.history {
            if phases.last() != Some(from) {
                phases.push(from.clone());
            }
            if phases.last() != Some(to) {
                phases.push(to.clone());
            }
        }
        phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.current(), &LoopPhase::AwaitingGoal);
        tracker.handle(LoopEvent::GoalAccepted { pose_known: false });
        tracker.handle(LoopEvent::PoseReceived);
        assert_eq!(tracker.current(), &LoopPhase::Initializing);
        tracker.handle(LoopEvent::SegmentFound);
        tracker.handle(LoopEvent::SegmentAppended { reached: false, segment_limit: None });
        assert_eq!(tracker.current(), &LoopPhase::Planning);
        tracker.handle(LoopEvent::SegmentFound);
        tracker.handle(LoopEvent::SegmentAppended { reached: true, segment_limit: None });
        assert_eq!(tracker.current(), &LoopPhase::GoalReached);

        assert_eq!(
            tracker.visited(),
            vec![
                LoopPhase::AwaitingGoal,
                LoopPhase::AwaitingFirstPose,
                LoopPhase::Initializing,
                LoopPhase::Extending,
                LoopPhase::Planning,
                LoopPhase::Extending,
                LoopPhase::GoalReached,
            ]
        );
    }

    #[test]
    fn test_retry_stays_in_phase() {
        let phase = next_phase(&LoopPhase::Planning, &LoopEvent::SearchFailed { retry: true, attempts: 1 });
        assert_eq!(phase, LoopPhase::Planning);
        let phase = next_phase(&LoopPhase::Planning, &LoopEvent::SearchFailed { retry: false, attempts: 6 });
        assert_eq!(phase, LoopPhase::Aborted(AbortReason::RetriesExhausted { attempts: 6 }));
    }

    #[test]
    fn test_new_goal_restarts_episode() {
        for phase in [LoopPhase::Planning, LoopPhase::GoalReached, LoopPhase::Aborted(AbortReason::SegmentLimit { segments: 3 })] {
            assert_eq!(next_phase(&phase, &LoopEvent::GoalAccepted { pose_known: true }), LoopPhase::Initializing);
        }
    }

    #[test]
    fn test_shutdown_is_final() {
        let aborted = next_phase(&LoopPhase::Extending, &LoopEvent::Shutdown);
        assert_eq!(aborted, LoopPhase::Aborted(AbortReason::Shutdown));
        assert_eq!(next_phase(&aborted, &LoopEvent::GoalAccepted { pose_known: true }), aborted);
        assert!(aborted.is_terminal());
        assert!(!aborted.is_active());
    }

    #[test]
    fn test_segment_limit_and_fatal() {
        let phase = next_phase(&LoopPhase::Extending, &LoopEvent::SegmentAppended { reached: false, segment_limit: Some(4) });
        assert_eq!(phase, LoopPhase::Aborted(AbortReason::SegmentLimit { segments: 4 }));
        let phase = next_phase(&LoopPhase::Planning, &LoopEvent::Fatal("oom".to_string()));
        assert!(matches!(phase, LoopPhase::Aborted(AbortReason::Fatal { .. })));
        assert_eq!(next_phase(&LoopPhase::GoalReached, &LoopEvent::Fatal("late".to_string())), LoopPhase::GoalReached);
    }

    #[test]
    fn test_irrelevant_events_ignored() {
        assert_eq!(next_phase(&LoopPhase::AwaitingGoal, &LoopEvent::PoseReceived), LoopPhase::AwaitingGoal);
        assert_eq!(next_phase(&LoopPhase::GoalReached, &LoopEvent::SegmentFound), LoopPhase::GoalReached);
    }
}
