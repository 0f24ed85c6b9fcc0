//! Authorization core.
//!
//! Requests carry a [`Principal`] decoded from the bearer token. Each protected handler
//! names the policy it needs (`"{Page}.{Operation}Policy"`) and calls
//! [`Authorizer::authorize`]:
//!
//! 1. [`PolicyProvider`] looks the name up in the registry built from the permission
//!    catalog, then in the registry of default policies.
//! 2. [`AuthorizationHandler`] evaluates every requirement of the policy.
//! 3. Permission requirements are checked against the set computed by
//!    [`PermissionResolver`] from the principal's role claims.
//!
//! Anything not explicitly granted is denied.

mod handler;
pub mod integrity;
mod policy;
mod principal;
mod resolver;
pub mod store;

pub use handler::{AuthorizationHandler, AuthorizationOutcome};
pub use policy::{Policy, PolicyLookup, PolicyProvider, PolicyRegistry, Requirement};
pub use principal::Principal;
pub use resolver::PermissionResolver;
pub use store::{PermissionStore, SqlitePermissionStore};

use std::sync::Arc;

use crate::config::AuthzSettings;
use crate::errors::{AppError, AppResult};

/// Suffix appended to `"{Page}.{Operation}"` to form a policy name.
pub const POLICY_SUFFIX: &str = "Policy";

/// Builds the policy name for a page/operation pair. Both sides of the check go through here.
pub fn policy_name(page: &str, operation: &str) -> String {
    format!("{page}.{operation}{POLICY_SUFFIX}")
}

/// Page and operation names end up inside policy names, so they must stay unambiguous.
pub fn validate_catalog_name(kind: &str, name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::bad_request(format!("{kind} name must not be empty")));
    }
    if name.contains('.') {
        return Err(AppError::bad_request(format!("{kind} name must not contain '.'")));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(AppError::bad_request(format!("{kind} name must not contain whitespace")));
    }
    Ok(())
}

/// Well-known role names
pub mod roles {
    pub const ADMINISTRATOR: &str = "Administrator";
}

/// Policy names used by the HTTP routes
pub mod policies {
    // Contacts
    pub const CONTACTS_CREATE: &str = "Contacts.CreatePolicy";
    pub const CONTACTS_READ: &str = "Contacts.ReadPolicy";
    pub const CONTACTS_UPDATE: &str = "Contacts.UpdatePolicy";
    pub const CONTACTS_DELETE: &str = "Contacts.DeletePolicy";

    // Users
    pub const USERS_CREATE: &str = "Users.CreatePolicy";
    pub const USERS_READ: &str = "Users.ReadPolicy";
    pub const USERS_UPDATE: &str = "Users.UpdatePolicy";
    pub const USERS_DELETE: &str = "Users.DeletePolicy";

    // Roles
    pub const ROLES_CREATE: &str = "Roles.CreatePolicy";
    pub const ROLES_READ: &str = "Roles.ReadPolicy";
    pub const ROLES_UPDATE: &str = "Roles.UpdatePolicy";
    pub const ROLES_DELETE: &str = "Roles.DeletePolicy";

    // Catalog
    pub const PERMISSIONS_CREATE: &str = "Permissions.CreatePolicy";
    pub const PERMISSIONS_READ: &str = "Permissions.ReadPolicy";
    pub const PERMISSIONS_DELETE: &str = "Permissions.DeletePolicy";

    /// Default (role-based) policy, registered outside the permission catalog.
    pub const ADMINISTRATOR_ONLY: &str = "AdministratorOnly";
}

/// Entry point used by route handlers.
#[derive(Clone)]
pub struct Authorizer {
    provider: Arc<PolicyProvider>,
    handler: AuthorizationHandler,
}

impl Authorizer {
    /// Builds the authorizer and loads the policy registry. Fails if the catalog is unreadable.
    pub async fn build(store: Arc<dyn PermissionStore>, settings: AuthzSettings) -> AppResult<Self> {
        let mut defaults = PolicyRegistry::default();
        defaults.insert(Policy::roles(
            policies::ADMINISTRATOR_ONLY,
            [roles::ADMINISTRATOR.to_string()],
        ));

        let provider = Arc::new(PolicyProvider::new(store.clone(), defaults));
        provider.refresh().await?;

        let resolver = if settings.permission_cache {
            PermissionResolver::with_cache(store)
        } else {
            PermissionResolver::new(store)
        };

        Ok(Self {
            provider,
            handler: AuthorizationHandler::new(resolver),
        })
    }

    /// Succeeds only when the policy exists and every requirement is met.
    pub async fn authorize(&self, principal: Option<&Principal>, policy_name: &str) -> AppResult<()> {
        let policy = match self.provider.get_policy(policy_name).await {
            PolicyLookup::Permission(policy) | PolicyLookup::Fallback(policy) => policy,
            PolicyLookup::Undefined => {
                tracing::warn!(policy = %policy_name, "authorization requested for undefined policy");
                return Err(AppError::forbidden("insufficient permissions"));
            }
        };

        for requirement in policy.requirements() {
            let outcome = self.handler.handle(principal, requirement).await?;
            if outcome != AuthorizationOutcome::Succeeded {
                tracing::info!(
                    user_id = ?principal.map(|p| p.user_id),
                    policy = %policy_name,
                    "authorization denied"
                );
                return Err(AppError::forbidden("insufficient permissions"));
            }
        }

        tracing::debug!(
            user_id = ?principal.map(|p| p.user_id),
            policy = %policy_name,
            "authorization granted"
        );
        Ok(())
    }

    pub fn resolver(&self) -> &PermissionResolver {
        self.handler.resolver()
    }

    pub fn provider(&self) -> &PolicyProvider {
        &self.provider
    }

    /// Call after any role-permission or role mutation.
    pub async fn invalidate(&self) {
        self.handler.resolver().invalidate().await;
    }

    /// Call after any page, operation or permission mutation. On failure the catalog
    /// registry stays stale and catalog policies deny until a later lookup reloads it.
    pub async fn refresh_catalog(&self) -> AppResult<()> {
        self.invalidate().await;
        self.provider.refresh().await
    }
}
