use super::policy::Requirement;
use super::principal::Principal;
use super::resolver::PermissionResolver;
use crate::errors::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Succeeded,
    Failed,
}

impl From<bool> for AuthorizationOutcome {
    fn from(granted: bool) -> Self {
        if granted {
            AuthorizationOutcome::Succeeded
        } else {
            AuthorizationOutcome::Failed
        }
    }
}

/// Evaluates one requirement for one principal.
#[derive(Clone)]
pub struct AuthorizationHandler {
    resolver: PermissionResolver,
}

impl AuthorizationHandler {
    pub fn new(resolver: PermissionResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    /// No principal means failure without consulting the store. Store errors propagate.
    pub async fn handle(
        &self,
        principal: Option<&Principal>,
        requirement: &Requirement,
    ) -> AppResult<AuthorizationOutcome> {
        let Some(principal) = principal else {
            return Ok(AuthorizationOutcome::Failed);
        };

        match requirement {
            Requirement::Permission(permission) => {
                let granted = self.resolver.resolve(principal).await?;
                let outcome = AuthorizationOutcome::from(granted.contains(permission));
                tracing::debug!(
                    user_id = %principal.user_id,
                    permission = %permission,
                    outcome = ?outcome,
                    "permission requirement evaluated"
                );
                Ok(outcome)
            }
            Requirement::Roles(roles) => Ok(principal.has_any_role(roles).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::authz::store::testing::InMemoryStore;

    fn handler(store: Arc<InMemoryStore>) -> AuthorizationHandler {
        AuthorizationHandler::new(PermissionResolver::new(store))
    }

    fn store() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::default().grant("Editor", "Contacts", "Create"))
    }

    fn permission(name: &str) -> Requirement {
        Requirement::Permission(name.to_string())
    }

    #[tokio::test]
    async fn succeeds_when_permission_is_granted() {
        let alice = Principal::new(Uuid::new_v4(), "alice").with_roles(vec!["Editor".to_string()]);
        let outcome = handler(store())
            .handle(Some(&alice), &permission("Contacts.CreatePolicy"))
            .await
            .unwrap();
        assert_eq!(outcome, AuthorizationOutcome::Succeeded);
    }

    #[tokio::test]
    async fn fails_when_permission_is_missing() {
        let alice = Principal::new(Uuid::new_v4(), "alice").with_roles(vec!["Editor".to_string()]);
        let outcome = handler(store())
            .handle(Some(&alice), &permission("Contacts.DeletePolicy"))
            .await
            .unwrap();
        assert_eq!(outcome, AuthorizationOutcome::Failed);
    }

    #[tokio::test]
    async fn fails_without_principal_and_never_reads_store() {
        let store = store();
        let outcome = handler(store.clone())
            .handle(None, &permission("Contacts.CreatePolicy"))
            .await
            .unwrap();
        assert_eq!(outcome, AuthorizationOutcome::Failed);
        assert_eq!(store.mapping_reads(), 0);
    }

    #[tokio::test]
    async fn permission_comparison_is_ordinal() {
        let alice = Principal::new(Uuid::new_v4(), "alice").with_roles(vec!["Editor".to_string()]);
        let outcome = handler(store())
            .handle(Some(&alice), &permission("contacts.createpolicy"))
            .await
            .unwrap();
        assert_eq!(outcome, AuthorizationOutcome::Failed);
    }

    #[tokio::test]
    async fn store_errors_are_not_turned_into_success() {
        let store = store();
        store.set_failing(true);
        let alice = Principal::new(Uuid::new_v4(), "alice").with_roles(vec!["Editor".to_string()]);

        let result = handler(store).handle(Some(&alice), &permission("Contacts.CreatePolicy")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn role_requirement_matches_any_role() {
        let requirement = Requirement::Roles(["Administrator".to_string(), "Owner".to_string()].into());
        let owner = Principal::new(Uuid::new_v4(), "olga").with_roles(vec!["Owner".to_string()]);
        let editor = Principal::new(Uuid::new_v4(), "ed").with_roles(vec!["Editor".to_string()]);
        let handler = handler(store());

        assert_eq!(
            handler.handle(Some(&owner), &requirement).await.unwrap(),
            AuthorizationOutcome::Succeeded
        );
        assert_eq!(
            handler.handle(Some(&editor), &requirement).await.unwrap(),
            AuthorizationOutcome::Failed
        );
    }
}
