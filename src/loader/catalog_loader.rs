// YAML catalog loading - roles, permission definitions and invalidation rules

use crate::cache::catalog::{EdgeRewrite, EdgeRoute, InvalidationCatalog};
use crate::core::errors::CoordinationError;
use crate::core::models::{InvalidationRule, PermissionDefinition};
use crate::engine::permissions::{PermissionResolver, RoleHierarchy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Root of the catalog YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogYaml {
    /// Lowest role first
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    permissions: Vec<PermissionDefinition>,
    #[serde(default)]
    invalidation: InvalidationSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InvalidationSection {
    #[serde(default)]
    rules: Vec<InvalidationRule>,
    #[serde(default)]
    edge_routes: Vec<EdgeRoute>,
    #[serde(default)]
    rewrites: Vec<EdgeRewrite>,
}

/// Startup catalog: built once, then handed to the services as explicit objects
#[derive(Debug, Clone)]
pub struct CatalogLoader {
    roles: RoleHierarchy,
    permissions: Vec<PermissionDefinition>,
    invalidation: InvalidationCatalog,
}

impl CatalogLoader {
    /// Load the catalog from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CoordinationError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(CoordinationError::ConfigurationError(format!(
                "Catalog file not found at {:?}",
                path_ref
            )));
        }

        let yaml_content = fs::read_to_string(path_ref).map_err(|e| {
            CoordinationError::ConfigurationError(format!("Failed to read catalog file: {}", e))
        })?;

        let loader = Self::parse(&yaml_content)?;
        info!(
            path = ?path_ref,
            permissions = loader.permissions.len(),
            rules = loader.invalidation.rules().len(),
            "Loaded coordination catalog"
        );
        Ok(loader)
    }

    /// Parse catalog YAML text
    pub fn parse(yaml_content: &str) -> Result<Self, CoordinationError> {
        let catalog: CatalogYaml = serde_yaml::from_str(yaml_content).map_err(|e| {
            CoordinationError::ConfigurationError(format!("Failed to parse catalog YAML: {}", e))
        })?;

        let loader = Self {
            roles: RoleHierarchy::new(catalog.roles)?,
            permissions: catalog.permissions,
            invalidation: InvalidationCatalog::new(
                catalog.invalidation.rules,
                catalog.invalidation.edge_routes,
                catalog.invalidation.rewrites,
            ),
        };
        loader.validate()?;
        Ok(loader)
    }

    /// Empty catalog: no permissions, no invalidation rules
    pub fn empty() -> Self {
        Self {
            roles: RoleHierarchy::default(),
            permissions: Vec::new(),
            invalidation: InvalidationCatalog::default(),
        }
    }

    /// Validate cross references (roles named by definitions, rule targets)
    pub fn validate(&self) -> Result<(), CoordinationError> {
        self.invalidation.validate()?;
        self.permission_resolver().map(|_| ())
    }

    pub fn roles(&self) -> &RoleHierarchy {
        &self.roles
    }

    pub fn permissions(&self) -> &[PermissionDefinition] {
        &self.permissions
    }

    pub fn permission_resolver(&self) -> Result<PermissionResolver, CoordinationError> {
        PermissionResolver::from_definitions(self.permissions.iter().cloned(), self.roles.clone())
    }

    pub fn invalidation_catalog(&self) -> InvalidationCatalog {
        self.invalidation.clone()
    }
}
