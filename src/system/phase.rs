//! Phase and condition bookkeeping on the NooBaa status

use super::System;
use crate::crd::{ConditionStatus, ConditionType, NooBaaStatus, SystemPhase};
use crate::domain::ports::ClusterClient;
use crate::error::ReconcileError;
use tracing::info;

/// Condition values derived from one phase, in the order
/// Available, Progressing, Degraded, Upgradeable
type ConditionSet = [ConditionStatus; 4];

const AXES: [ConditionType; 4] = [
    ConditionType::Available,
    ConditionType::Progressing,
    ConditionType::Degraded,
    ConditionType::Upgradeable,
];

fn phase_conditions(phase: SystemPhase) -> Option<(ConditionSet, String, String)> {
    use ConditionStatus::*;
    match phase {
        SystemPhase::Verifying => Some((
            [True, False, False, Unknown],
            "ReconcileInit".to_string(),
            "Initializing noobaa cluster".to_string(),
        )),
        SystemPhase::Creating | SystemPhase::WaitingToConnect | SystemPhase::Configuring => Some((
            [False, True, False, False],
            phase.to_string(),
            phase.to_string(),
        )),
        SystemPhase::Ready => Some((
            [True, False, False, True],
            "ReconcileCompleted".to_string(),
            "ReconcileCompleted".to_string(),
        )),
        SystemPhase::Rejected => None,
    }
}

fn apply(status: &mut NooBaaStatus, values: ConditionSet, reason: &str, message: &str) {
    for (axis, value) in AXES.into_iter().zip(values) {
        status.set_condition(axis, value, reason, message);
    }
}

impl<C: ClusterClient> System<C> {
    /// Move to `phase` and derive the four condition axes from it.
    ///
    /// Rejected leaves the conditions untouched.
    pub fn set_phase(&mut self, phase: SystemPhase) {
        info!(system = %self.request, %phase, "Set phase");
        let status = self.status_mut();
        status.phase = Some(phase);
        if let Some((values, reason, message)) = phase_conditions(phase) {
            apply(status, values, &reason, &message);
        }
    }

    /// Mark the system degraded because of a failed step
    pub fn set_error_condition(&mut self, err: &ReconcileError) {
        let message = format!("Error while reconciling: {}", err);
        use ConditionStatus::*;
        apply(
            self.status_mut(),
            [Unknown, False, True, Unknown],
            "ReconcileFailed",
            &message,
        );
    }
}
