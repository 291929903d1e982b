//! Input validation for API parameters
//!
//! Client parameter errors are rejected here, before any network or storage
//! call is made.

use validator::ValidationError;

/// Maximum length for data_id field
pub const MAX_DATA_ID_LENGTH: usize = 256;

/// Maximum length for group field
pub const MAX_GROUP_LENGTH: usize = 128;

/// Maximum length for namespace_id field
pub const MAX_NAMESPACE_ID_LENGTH: usize = 128;

/// Maximum length for service_name field
pub const MAX_SERVICE_NAME_LENGTH: usize = 512;

/// Maximum length for content field (1MB)
pub const MAX_CONTENT_LENGTH: usize = 1024 * 1024;

/// Maximum length for a gray tag
pub const MAX_TAG_LENGTH: usize = 16;

/// Validate data_id format
///
/// Data ID must:
/// - Not be empty
/// - Not exceed MAX_DATA_ID_LENGTH characters
/// - Contain only alphanumeric characters, dots, hyphens, underscores, and colons
pub fn validate_data_id(data_id: &str) -> Result<(), ValidationError> {
    if data_id.is_empty() {
        return Err(ValidationError::new("data_id_empty"));
    }
    if data_id.len() > MAX_DATA_ID_LENGTH {
        return Err(ValidationError::new("data_id_too_long"));
    }
    if !data_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ':')
    {
        return Err(ValidationError::new("data_id_invalid_chars"));
    }
    Ok(())
}

/// Validate group format
pub fn validate_group(group: &str) -> Result<(), ValidationError> {
    if group.is_empty() {
        return Err(ValidationError::new("group_empty"));
    }
    if group.len() > MAX_GROUP_LENGTH {
        return Err(ValidationError::new("group_too_long"));
    }
    if !group
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ':')
    {
        return Err(ValidationError::new("group_invalid_chars"));
    }
    Ok(())
}

/// Validate namespace_id ("tenant") format; empty means the default namespace
pub fn validate_namespace_id(namespace_id: &str) -> Result<(), ValidationError> {
    if namespace_id.len() > MAX_NAMESPACE_ID_LENGTH {
        return Err(ValidationError::new("namespace_id_too_long"));
    }
    if !namespace_id.is_empty()
        && !namespace_id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::new("namespace_id_invalid_chars"));
    }
    Ok(())
}

/// Validate service_name format
pub fn validate_service_name(service_name: &str) -> Result<(), ValidationError> {
    if service_name.is_empty() {
        return Err(ValidationError::new("service_name_empty"));
    }
    if service_name.len() > MAX_SERVICE_NAME_LENGTH {
        return Err(ValidationError::new("service_name_too_long"));
    }
    Ok(())
}

/// Validate content length
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::new("content_empty"));
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(ValidationError::new("content_too_long"));
    }
    Ok(())
}

/// Validate a gray tag parameter
pub fn validate_tag(tag: &str) -> Result<(), ValidationError> {
    if tag.len() > MAX_TAG_LENGTH {
        return Err(ValidationError::new("tag_too_long"));
    }
    if !tag
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return Err(ValidationError::new("tag_invalid_chars"));
    }
    Ok(())
}
