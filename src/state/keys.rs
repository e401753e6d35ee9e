// Logical keyspace of the shared store

/// Tag index key: `tag:{tag}` -> set of full cache keys
pub fn tag_key(tag: &str) -> String {
    format!("tag:{}", tag)
}

/// Grant record: `auth:permission:{principal}:{type}:{id}:{permission}`
pub fn grant_key(principal_id: &str, resource_type: &str, resource_id: &str, permission: &str) -> String {
    format!(
        "auth:permission:{}:{}:{}:{}",
        principal_id, resource_type, resource_id, permission
    )
}

/// Per-principal grant index: `auth:user:{principal}:{type}:{id}`
pub fn user_index_key(principal_id: &str, resource_type: &str, resource_id: &str) -> String {
    format!("auth:user:{}:{}:{}", principal_id, resource_type, resource_id)
}

/// Per-resource grant index: `auth:resource:{type}:{id}`
pub fn resource_index_key(resource_type: &str, resource_id: &str) -> String {
    format!("auth:resource:{}:{}", resource_type, resource_id)
}

/// Ownership relation: `auth:owner:{type}:{id}` -> owner id (no TTL)
pub fn owner_key(resource_type: &str, resource_id: &str) -> String {
    format!("auth:owner:{}:{}", resource_type, resource_id)
}

/// Principal id and permission name carried by a grant key, given the
/// resource scope it belongs to. The permission is everything after the
/// scope, so names containing `:` survive.
pub fn split_grant_key<'a>(key: &'a str, resource_type: &str, resource_id: &str) -> Option<(&'a str, &'a str)> {
    let rest = key.strip_prefix("auth:permission:")?;
    let scope = format!(":{}:{}:", resource_type, resource_id);
    let idx = rest.find(&scope)?;
    let principal_id = &rest[..idx];
    let permission = &rest[idx + scope.len()..];
    (!principal_id.is_empty() && !permission.is_empty()).then_some((principal_id, permission))
}
