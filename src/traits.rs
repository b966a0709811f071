//! Core traits for the ledger

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::hash::Hash;

use crate::context::ApplyContext;
use crate::error::ValidationError;
use crate::transaction::TransactionKind;

/// Trait for state objects that can be replayed deterministically
pub trait State: Clone + Serialize + DeserializeOwned + Hash {
    /// Validate the state for consistency and correctness
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Pure state-transition function shared by pre-check, commit-time validation and replay
pub trait Reducer<S: State, T> {
    /// Apply one transaction, producing the next state or the reason it was refused
    fn apply(&self, state: &S, transaction: &T, context: &ApplyContext) -> Result<S, ValidationError>;

    /// In-place form used by replay loops. On `Err` the state must be left unchanged.
    fn apply_in_place(
        &self,
        state: &mut S,
        transaction: &T,
        context: &ApplyContext,
    ) -> Result<(), ValidationError> {
        *state = self.apply(state, transaction, context)?;
        Ok(())
    }
}

/// Source of commit timestamps. Only the ledger's append path reads it; the reducer never does.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Privileged operations the ledger gates on an external capability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Append(TransactionKind),
    Reset,
    Verify,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Append(kind) => write!(f, "append {}", kind),
            Action::Reset => f.write_str("reset"),
            Action::Verify => f.write_str("verify"),
        }
    }
}

/// Capability predicate supplied by the permission collaborator
pub trait Authorizer {
    fn can(&self, action: Action) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(Action) -> bool,
{
    fn can(&self, action: Action) -> bool {
        self(action)
    }
}
