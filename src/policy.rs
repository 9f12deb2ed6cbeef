use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError, models::Role};

/// Actor
///
/// The identity making a request: either anonymous or a resolved
/// authenticated user. Every policy and data operation takes the actor
/// explicitly; there is no ambient request context to read it from.
#[derive(Debug, Clone)]
pub enum Actor {
    Anonymous,
    User(AuthUser),
}

impl Actor {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Actor::Anonymous)
    }

    pub fn user(&self) -> Option<&AuthUser> {
        match self {
            Actor::Anonymous => None,
            Actor::User(user) => Some(user),
        }
    }

    /// Admin capability: the admin role, or the orthogonal superuser flag.
    /// Every place that checks admin checks both.
    pub fn is_admin(&self) -> bool {
        self.user()
            .map(|u| u.role == Role::Admin || u.is_superuser)
            .unwrap_or(false)
    }

    pub fn is_moder(&self) -> bool {
        self.user().map(|u| u.role == Role::Moderator).unwrap_or(false)
    }
}

/// Action class a policy decides on. Reads are GET-shaped; writes cover
/// create, update, and delete alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Policy
///
/// A pure, stateless decision function over (actor, access, resource).
/// Two phases: `allows` is the coarse check made before the concrete object
/// is loaded; `allows_object` is the fine check against the loaded object's
/// author. Both must pass, and since both are side-effect-free predicates the
/// evaluation order never changes the result.
pub trait Policy {
    fn allows(&self, actor: &Actor, access: Access) -> bool;

    /// Object-level refinement. Defaults to the coarse decision for policies
    /// that have no per-object rule.
    fn allows_object(&self, actor: &Actor, access: Access, author_id: Uuid) -> bool {
        let _ = author_id;
        self.allows(actor, access)
    }
}

/// Admin-only: every action, reads included, requires admin capability.
/// Applied to user management.
pub struct IsAdmin;

impl Policy for IsAdmin {
    fn allows(&self, actor: &Actor, _access: Access) -> bool {
        actor.is_admin()
    }
}

/// Read for anyone (anonymous included); writes require admin capability.
/// Applied to Category, Genre, and Title management.
pub struct AdminOrReadOnly;

impl Policy for AdminOrReadOnly {
    fn allows(&self, actor: &Actor, access: Access) -> bool {
        match access {
            Access::Read => true,
            Access::Write => actor.is_admin(),
        }
    }
}

/// Read for anyone; writes require authentication; mutating a specific
/// object additionally requires being its author, or holding moderator or
/// admin capability. Applied to Review and Comment.
pub struct AuthorOrReadOnly;

impl Policy for AuthorOrReadOnly {
    fn allows(&self, actor: &Actor, access: Access) -> bool {
        match access {
            Access::Read => true,
            Access::Write => !actor.is_anonymous(),
        }
    }

    fn allows_object(&self, actor: &Actor, access: Access, author_id: Uuid) -> bool {
        match access {
            Access::Read => true,
            Access::Write => match actor.user() {
                None => false,
                Some(user) => {
                    user.id == author_id || actor.is_admin() || actor.is_moder()
                }
            },
        }
    }
}

/// Coarse-check entry point for handlers. Denials carry no detail about
/// which predicate failed: anonymous actors get 401, everyone else 403.
pub fn check(policy: &impl Policy, actor: &Actor, access: Access) -> Result<(), ApiError> {
    if policy.allows(actor, access) {
        Ok(())
    } else if actor.is_anonymous() {
        Err(ApiError::Unauthorized)
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Fine-check entry point, run after the concrete object is loaded.
pub fn check_object(
    policy: &impl Policy,
    actor: &Actor,
    access: Access,
    author_id: Uuid,
) -> Result<(), ApiError> {
    if policy.allows_object(actor, access, author_id) {
        Ok(())
    } else if actor.is_anonymous() {
        Err(ApiError::Unauthorized)
    } else {
        Err(ApiError::Forbidden)
    }
}
