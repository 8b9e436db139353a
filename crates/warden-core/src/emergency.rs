// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Emergency controller: the process-wide NORMAL ⇄ HALTED state machine.
//!
//! The validation hot path reads a single `AtomicBool`.  Transitions take an
//! exclusive lock, write their audit record while holding it, and only then
//! publish the new state, so no observer can see a transition that has no
//! matching audit entry.
//!
//! The controller also keeps the rolling rejection window used by the
//! auto-halt policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::info;

use crate::config::AutoHaltPolicy;
use crate::error::{AuditError, EngineError};
use crate::types::{EmergencyState, EmergencyStatus};

/// Owns the single [`EmergencyState`] of an engine.
///
/// ```rust
/// use warden_core::emergency::EmergencyController;
/// use warden_core::types::EmergencyStatus;
///
/// let controller = EmergencyController::new(Default::default(), 0);
/// controller
///     .transition(EmergencyStatus::Halted, Some("drill".into()), "admin-1", 10, |_| Ok(()))
///     .unwrap();
/// assert!(controller.is_halted());
///
/// // Halting twice is refused.
/// assert!(controller
///     .transition(EmergencyStatus::Halted, None, "admin-1", 11, |_| Ok(()))
///     .is_err());
/// ```
#[derive(Debug)]
pub struct EmergencyController {
    halted: AtomicBool,
    state: Mutex<EmergencyState>,
    monitor: Mutex<RejectionWindow>,
    policy: AutoHaltPolicy,
}

impl EmergencyController {
    pub fn new(policy: AutoHaltPolicy, now_ms: u64) -> Self {
        Self {
            halted: AtomicBool::new(false),
            state: Mutex::new(EmergencyState::normal(now_ms)),
            monitor: Mutex::new(RejectionWindow::default()),
            policy,
        }
    }

    /// Lock-free read used by every validation.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EmergencyState {
        self.state.lock().clone()
    }

    /// Run `f` against the current state with transitions held off.
    ///
    /// No transition can record or publish until `f` returns, so an audit
    /// record written inside `f` is ordered consistently with the state it
    /// saw.  `f` must not call back into this controller.
    pub fn with_state<R>(&self, f: impl FnOnce(&EmergencyState) -> R) -> R {
        let state = self.state.lock();
        f(&state)
    }

    pub fn policy(&self) -> &AutoHaltPolicy {
        &self.policy
    }

    /// Move to `target`.
    ///
    /// `record` is called with the prospective new state while the
    /// transition lock is held; the state is published only if it succeeds.
    ///
    /// # Errors
    ///
    /// * [`EngineError::InvalidTransition`] when already in `target`.
    /// * [`EngineError::Audit`] when `record` fails; the state is unchanged.
    pub fn transition<F>(
        &self,
        target: EmergencyStatus,
        reason: Option<String>,
        principal: &str,
        now_ms: u64,
        record: F,
    ) -> Result<EmergencyState, EngineError>
    where
        F: FnOnce(&EmergencyState) -> Result<(), AuditError>,
    {
        let mut state = self.state.lock();
        if state.status == target {
            return Err(EngineError::InvalidTransition {
                current: state.status,
                attempted: target,
            });
        }

        let next = EmergencyState {
            status: target,
            reason: match target {
                EmergencyStatus::Halted => reason,
                EmergencyStatus::Normal => None,
            },
            principal: Some(principal.into()),
            changed_at_ms: now_ms,
        };
        record(&next)?;

        *state = next.clone();
        self.halted.store(target == EmergencyStatus::Halted, Ordering::Release);
        if target == EmergencyStatus::Normal {
            self.monitor.lock().clear();
        }
        info!(status = %target, principal, reason = ?next.reason, "emergency state changed");
        Ok(next)
    }

    /// Feed one validation outcome into the rolling window.
    ///
    /// Returns the rejection rate when the auto-halt policy is enabled and the
    /// rate exceeds its limit; the caller is expected to trigger the halt.
    pub fn observe(&self, rejected: bool, now_ms: u64) -> Option<f64> {
        if !self.policy.enabled || self.is_halted() {
            return None;
        }
        let mut window = self.monitor.lock();
        window.push(rejected, now_ms, self.policy.window_ms);
        let (samples, rate) = window.rate();
        (samples >= self.policy.min_samples && rate > self.policy.max_rejection_rate)
            .then_some(rate)
    }
}

#[derive(Debug, Default)]
struct RejectionWindow {
    samples: VecDeque<(u64, bool)>,
    rejected: usize,
}

impl RejectionWindow {
    fn push(&mut self, rejected: bool, now_ms: u64, window_ms: u64) {
        self.samples.push_back((now_ms, rejected));
        if rejected {
            self.rejected += 1;
        }
        let horizon = now_ms.saturating_sub(window_ms);
        while let Some(&(at, was_rejected)) = self.samples.front() {
            if at >= horizon {
                break;
            }
            self.samples.pop_front();
            if was_rejected {
                self.rejected -= 1;
            }
        }
    }

    fn rate(&self) -> (usize, f64) {
        let samples = self.samples.len();
        if samples == 0 {
            return (0, 0.0);
        }
        (samples, self.rejected as f64 / samples as f64)
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.rejected = 0;
    }
}
