/// Router Module Index
///
/// Splits the routing table by access level. The split is what applies the
/// authentication layer: everything in `authenticated` sits behind it, nothing
/// in `public` does.

/// Routes reachable without a session identity: home, registration, login, health.
pub mod public;

/// Routes behind the `Authenticated` guard layer. Handlers receive the resolved
/// `AuthUser` and run their own ownership guards.
pub mod authenticated;
