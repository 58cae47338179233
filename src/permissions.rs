//! Per-request and per-object authorization.
//!
//! A [`Policy`] is an ordered list of [`Rule`]s that must all allow the
//! action. The request-level check runs before any lookup; the object-level
//! check runs once the target has been loaded, before anything is written.

use crate::{auth::Caller, config::ReadingWritePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Retrieve,
    Create,
    Update,
    PartialUpdate,
    Destroy,
}

impl Action {
    /// Read-only actions.
    pub fn is_safe(self) -> bool {
        matches!(self, Action::List | Action::Retrieve)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Unsafe actions need an authenticated caller.
    AuthenticatedOrReadOnly,
    /// Unsafe actions on an object need the caller to be its owner.
    OwnerOrReadOnly,
    /// Identity resource: anyone may list, nobody may create here, and
    /// everything else is limited to the caller's own record.
    SelfOrReadOnly,
}

impl Rule {
    pub fn has_permission(self, caller: &Caller, action: Action) -> bool {
        match self {
            Rule::AuthenticatedOrReadOnly => action.is_safe() || caller.is_authenticated(),
            Rule::OwnerOrReadOnly => true,
            Rule::SelfOrReadOnly => match action {
                Action::List => true,
                Action::Create => false,
                _ => caller.is_authenticated(),
            },
        }
    }

    /// `owner_id` is the owning user's id; for the identity resource it is
    /// the record's own id.
    pub fn has_object_permission(self, caller: &Caller, action: Action, owner_id: i64) -> bool {
        match self {
            Rule::AuthenticatedOrReadOnly => true,
            Rule::OwnerOrReadOnly => action.is_safe() || caller.user_id() == Some(owner_id),
            Rule::SelfOrReadOnly => caller.user_id() == Some(owner_id),
        }
    }
}

/// Why a policy refused. Both surface as 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NotAuthenticated,
    NotPermitted,
}

impl Denial {
    fn for_caller(caller: &Caller) -> Self {
        if caller.is_authenticated() {
            Denial::NotPermitted
        } else {
            Denial::NotAuthenticated
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Denial::NotAuthenticated => "Authentication credentials were not provided.",
            Denial::NotPermitted => "You do not have permission to perform this action.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    rules: &'static [Rule],
}

impl Policy {
    pub const fn new(rules: &'static [Rule]) -> Self {
        Self { rules }
    }

    pub const fn users() -> Self {
        Self::new(&[Rule::SelfOrReadOnly])
    }

    pub const fn hydroponics() -> Self {
        Self::new(&[Rule::AuthenticatedOrReadOnly, Rule::OwnerOrReadOnly])
    }

    /// Readings are owned through their parent system.
    pub const fn sensor_readings(policy: ReadingWritePolicy) -> Self {
        match policy {
            ReadingWritePolicy::Owner => Self::hydroponics(),
            ReadingWritePolicy::Authenticated => Self::new(&[Rule::AuthenticatedOrReadOnly]),
        }
    }

    pub fn check(&self, caller: &Caller, action: Action) -> Result<(), Denial> {
        if self.rules.iter().all(|r| r.has_permission(caller, action)) {
            Ok(())
        } else {
            Err(Denial::for_caller(caller))
        }
    }

    pub fn check_object(&self, caller: &Caller, action: Action, owner_id: i64) -> Result<(), Denial> {
        if self
            .rules
            .iter()
            .all(|r| r.has_object_permission(caller, action, owner_id))
        {
            Ok(())
        } else {
            Err(Denial::for_caller(caller))
        }
    }
}
