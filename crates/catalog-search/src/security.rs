//! Security filters scoping a query to an authenticated principal.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::SearchError;

/// The caller a query runs on behalf of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// Produces the filter clause added to every query; `None` means unfiltered.
pub trait SecurityQueryBuilder: Send + Sync {
    fn build(&self, principal: &Principal) -> Option<Value>;
}

/// Matches documents whose `access_users` contains the user or one of its
/// groups, or whose `access_roles` contains one of its roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessFieldsBuilder;

impl SecurityQueryBuilder for AccessFieldsBuilder {
    fn build(&self, principal: &Principal) -> Option<Value> {
        let mut users = vec![principal.user_id.clone()];
        users.extend(principal.groups.iter().cloned());
        Some(json!({
            "bool": {
                "should": [
                    { "terms": { "access_users": users } },
                    { "terms": { "access_roles": principal.roles } }
                ],
                "minimum_should_match": 1
            }
        }))
    }
}

/// No filtering. For trusted internal callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnrestrictedBuilder;

impl SecurityQueryBuilder for UnrestrictedBuilder {
    fn build(&self, _principal: &Principal) -> Option<Value> {
        None
    }
}

/// Resolve the `security_query_builder` setting.
pub fn security_builder(name: &str) -> Result<Arc<dyn SecurityQueryBuilder>, SearchError> {
    match name {
        "default" => Ok(Arc::new(AccessFieldsBuilder)),
        "none" => Ok(Arc::new(UnrestrictedBuilder)),
        other => Err(SearchError::Config(format!(
            "unknown security_query_builder '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::matches;

    #[test]
    fn test_default_builder_filters_by_access_fields() {
        let builder = security_builder("default").unwrap();
        let principal = Principal::new("bob")
            .with_groups(vec!["editors".into()])
            .with_roles(vec!["guillotina.Reader".into()]);
        let filter = builder.build(&principal).unwrap();

        let visible = json!({"access_users": ["editors"]});
        let by_role = json!({"access_roles": ["guillotina.Reader"]});
        let hidden = json!({"access_users": ["alice"], "access_roles": ["guillotina.Owner"]});
        assert!(matches(&filter, "a", &visible).unwrap());
        assert!(matches(&filter, "b", &by_role).unwrap());
        assert!(!matches(&filter, "c", &hidden).unwrap());
    }

    #[test]
    fn test_none_builder_and_unknown_name() {
        assert!(security_builder("none").unwrap().build(&Principal::new("x")).is_none());
        assert!(matches!(security_builder("acl.custom"), Err(SearchError::Config(_))));
    }
}
