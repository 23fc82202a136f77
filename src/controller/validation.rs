//! Spec checks that need no cluster access

use crate::controller::error::{Error, Result};
use crate::crd::{ExternalAccess, Storage};
use crate::resolver::parse_gateway;

/// At most one storage backend may be selected
pub fn validate_storage(storage: &Storage) -> Result<()> {
    let selected = storage.selected_backends();
    if selected.len() > 1 {
        return Err(Error::ValidationError(format!(
            "only one storage option can be used, got {}",
            selected.join(", ")
        )));
    }
    Ok(())
}

/// A custom gateway must be `<namespace>/<name>` and come with a host
pub fn validate_external_access(access: &ExternalAccess) -> Result<()> {
    if !access.is_enabled() {
        return Ok(());
    }
    let Some(gateway) = access.gateway.as_deref() else {
        return Ok(());
    };
    if parse_gateway(gateway).is_none() {
        return Err(Error::ValidationError(format!(
            "gateway '{gateway}' is in wrong format, expected <namespace>/<name>"
        )));
    }
    if access.host.as_deref().is_none_or(str::is_empty) {
        return Err(Error::ValidationError(format!(
            "host is required when a custom gateway '{gateway}' is set"
        )));
    }
    Ok(())
}
