// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Role-based authorisation for administrative operations.
//!
//! Triggering a halt, lifting it, reloading constraints, defining budgets and
//! resuming a faulted audit log are privileged.  Each principal (a human
//! operator or service account, identified by a string) is granted one or
//! more [`Role`]s; each role implies a fixed set of [`Permission`]s.
//!
//! | Role            | TriggerHalt | LiftHalt | ReloadConstraints | DefineBudget | ResumeAudit |
//! |-----------------|:-----------:|:--------:|:-----------------:|:------------:|:-----------:|
//! | `Operator`      | yes         |          |                   |              |             |
//! | `Administrator` | yes         | yes      | yes               | yes          | yes         |

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EngineError;

/// Principal used for halts raised by the engine itself.
pub const SYSTEM_PRINCIPAL: &str = "system:auto-halt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Administrator,
}

impl Role {
    pub fn grants(self, permission: Permission) -> bool {
        match self {
            Role::Administrator => true,
            Role::Operator => permission == Permission::TriggerHalt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    TriggerHalt,
    LiftHalt,
    ReloadConstraints,
    DefineBudget,
    ResumeAudit,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Permission::TriggerHalt       => "trigger an emergency halt",
            Permission::LiftHalt          => "lift an emergency halt",
            Permission::ReloadConstraints => "reload constraints",
            Permission::DefineBudget      => "define resource budgets",
            Permission::ResumeAudit       => "resume a faulted audit log",
        })
    }
}

/// Principal → roles table consulted before every administrative call.
///
/// ```rust
/// use warden_core::auth::{AccessPolicy, Permission, Role};
///
/// let mut policy = AccessPolicy::default();
/// policy.grant("oncall", Role::Operator);
///
/// assert!(policy.authorize("oncall", Permission::TriggerHalt).is_ok());
/// assert!(policy.authorize("oncall", Permission::LiftHalt).is_err());
/// assert!(policy.authorize("stranger", Permission::TriggerHalt).is_err());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    principals: HashMap<String, BTreeSet<Role>>,
}

impl AccessPolicy {
    pub fn grant(&mut self, principal: impl Into<String>, role: Role) -> &mut Self {
        self.principals.entry(principal.into()).or_default().insert(role);
        self
    }

    pub fn with_grant(mut self, principal: impl Into<String>, role: Role) -> Self {
        self.grant(principal, role);
        self
    }

    pub fn roles(&self, principal: &str) -> Option<&BTreeSet<Role>> {
        self.principals.get(principal)
    }

    pub fn is_allowed(&self, principal: &str, permission: Permission) -> bool {
        self.principals
            .get(principal)
            .map(|roles| roles.iter().any(|role| role.grants(permission)))
            .unwrap_or(false)
    }

    /// Return `Ok(())` when `principal` holds `permission`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`] otherwise.
    pub fn authorize(&self, principal: &str, permission: Permission) -> Result<(), EngineError> {
        if self.is_allowed(principal, permission) {
            return Ok(());
        }
        warn!(principal, %permission, "administrative call denied");
        Err(EngineError::Unauthorized {
            principal: principal.into(),
            permission,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrator_holds_every_permission() {
        let policy = AccessPolicy::default().with_grant("root", Role::Administrator);
        for permission in [
            Permission::TriggerHalt,
            Permission::LiftHalt,
            Permission::ReloadConstraints,
            Permission::DefineBudget,
            Permission::ResumeAudit,
        ] {
            assert!(policy.is_allowed("root", permission));
        }
    }

    #[test]
    fn roles_accumulate_per_principal() {
        let mut policy = AccessPolicy::default();
        policy.grant("ops", Role::Operator).grant("ops", Role::Administrator);
        assert_eq!(policy.roles("ops").map(BTreeSet::len), Some(2));
        assert!(policy.is_allowed("ops", Permission::ReloadConstraints));
    }

    #[test]
    fn unauthorized_error_names_principal_and_permission() {
        let policy = AccessPolicy::default();
        let err = policy.authorize("mallory", Permission::LiftHalt).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("mallory"));
        assert!(message.contains("lift an emergency halt"));
    }
}
