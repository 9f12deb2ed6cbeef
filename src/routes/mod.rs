/// Router Module Index
///
/// Organizes the routing surface into privilege-segregated modules so the
/// access level of every endpoint is visible from its placement alone.
/// Handlers additionally run the policy checks themselves, so moving a route
/// between modules cannot silently widen access.

/// Routes accessible to all clients, anonymous included: the auth flow and
/// every read endpoint of the catalogue.
pub mod public;

/// Routes behind the authentication layer: self-service profile access and
/// all review/comment writes.
pub mod authenticated;

/// Routes whose every operation requires admin capability: account
/// management and catalogue writes.
pub mod admin;
