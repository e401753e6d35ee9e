// Permission definition registry and role ordering

use crate::core::errors::CoordinationError;
use crate::core::models::PermissionDefinition;
use std::collections::HashMap;

/// Ordered roles, lowest privilege first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleHierarchy {
    roles: Vec<String>,
}

impl RoleHierarchy {
    pub fn new<I, S>(roles: I) -> Result<Self, CoordinationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for role in roles {
            let role = role.into().to_lowercase();
            if ordered.contains(&role) {
                return Err(CoordinationError::ConfigurationError(format!(
                    "Role '{}' listed twice in hierarchy",
                    role
                )));
            }
            ordered.push(role);
        }
        Ok(Self { roles: ordered })
    }

    pub fn rank(&self, role: &str) -> Option<usize> {
        let role = role.to_lowercase();
        self.roles.iter().position(|r| *r == role)
    }

    pub fn contains(&self, role: &str) -> bool {
        self.rank(role).is_some()
    }

    /// Whether any of `held` is `minimum` or ranks above it
    pub fn satisfies(&self, held: &[String], minimum: &str) -> bool {
        let Some(required) = self.rank(minimum) else {
            return false;
        };
        held.iter()
            .filter_map(|role| self.rank(role))
            .any(|rank| rank >= required)
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

/// Registry of permission definitions per resource type with a
/// (resource type, action) -> required definitions index.
///
/// Resource types and actions are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct PermissionResolver {
    definitions: HashMap<String, Vec<PermissionDefinition>>,
    by_action: HashMap<(String, String), Vec<usize>>,
    roles: RoleHierarchy,
}

impl PermissionResolver {
    pub fn new(roles: RoleHierarchy) -> Self {
        Self {
            definitions: HashMap::new(),
            by_action: HashMap::new(),
            roles,
        }
    }

    pub fn from_definitions<I>(definitions: I, roles: RoleHierarchy) -> Result<Self, CoordinationError>
    where
        I: IntoIterator<Item = PermissionDefinition>,
    {
        let mut resolver = Self::new(roles);
        for definition in definitions {
            resolver.register(definition)?;
        }
        Ok(resolver)
    }

    /// Add a definition; names are unique per resource type
    pub fn register(&mut self, definition: PermissionDefinition) -> Result<(), CoordinationError> {
        if definition.name.trim().is_empty() || definition.resource_type.trim().is_empty() {
            return Err(CoordinationError::ConfigurationError(
                "Permission definitions need a name and a resource type".to_string(),
            ));
        }
        if let Some(role) = &definition.minimum_role {
            if !self.roles.contains(role) {
                return Err(CoordinationError::ConfigurationError(format!(
                    "Permission '{}' requires unknown role '{}'",
                    definition.name, role
                )));
            }
        }
        if definition.requires_condition() && definition.condition.is_none() {
            return Err(CoordinationError::ConfigurationError(format!(
                "Conditional permission '{}' has no condition",
                definition.name
            )));
        }

        let resource_type = definition.resource_type.to_lowercase();
        let registered = self.definitions.entry(resource_type.clone()).or_default();
        if registered.iter().any(|d| d.name == definition.name) {
            return Err(CoordinationError::ConfigurationError(format!(
                "Permission '{}' registered twice for resource type '{}'",
                definition.name, definition.resource_type
            )));
        }

        let index = registered.len();
        for action in &definition.actions {
            let slot = self
                .by_action
                .entry((resource_type.clone(), action.to_lowercase()))
                .or_default();
            if !slot.contains(&index) {
                slot.push(index);
            }
        }
        registered.push(definition);
        Ok(())
    }

    /// Definitions an action requires, in registration order
    pub fn required_for(&self, resource_type: &str, action: &str) -> Vec<&PermissionDefinition> {
        let resource_type = resource_type.to_lowercase();
        let Some(registered) = self.definitions.get(&resource_type) else {
            return Vec::new();
        };
        self.by_action
            .get(&(resource_type, action.to_lowercase()))
            .map(|indices| indices.iter().filter_map(|&i| registered.get(i)).collect())
            .unwrap_or_default()
    }

    /// Owner-category permissions of a resource type
    pub fn owner_permissions(&self, resource_type: &str) -> Vec<&PermissionDefinition> {
        self.definitions(resource_type)
            .iter()
            .filter(|d| d.satisfied_by_ownership())
            .collect()
    }

    pub fn definitions(&self, resource_type: &str) -> &[PermissionDefinition] {
        self.definitions
            .get(&resource_type.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn definition(&self, resource_type: &str, name: &str) -> Option<&PermissionDefinition> {
        self.definitions(resource_type).iter().find(|d| d.name == name)
    }

    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn roles(&self) -> &RoleHierarchy {
        &self.roles
    }
}
