use std::fmt;

use crate::model::ids::UserId;

/// Who the current session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Identity {
    /// No signed-in learner; progress lives only in the local mirror.
    #[default]
    Anonymous,
    User(UserId),
}

impl Identity {
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Identity::Anonymous => None,
            Identity::User(id) => Some(*id),
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    /// Stable prefix used to scope local mirror keys per identity.
    #[must_use]
    pub fn mirror_scope(&self) -> String {
        match self {
            Identity::Anonymous => "anon".to_string(),
            Identity::User(id) => format!("user-{id}"),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => write!(f, "anonymous"),
            Identity::User(id) => write!(f, "user {id}"),
        }
    }
}
