//! PersistentVolumeClaim size adjustment
//!
//! Claims can grow but never shrink. When the live claim requests more storage
//! than the chart renders, the rendered request is raised to the live value so
//! the apply does not get rejected by the API server.

use kube::api::DynamicObject;
use tracing::debug;

use crate::installer::{InstallerError, PreApplyAction};

const STORAGE_POINTER: &str = "/spec/resources/requests/storage";

#[derive(Clone, Debug, Default)]
pub struct PvcSizeAdjust;

impl PreApplyAction for PvcSizeAdjust {
    fn kind(&self) -> &str {
        "PersistentVolumeClaim"
    }

    fn adjust(
        &self,
        desired: &mut DynamicObject,
        current: Option<&DynamicObject>,
    ) -> Result<(), InstallerError> {
        let Some(current_size) = current
            .and_then(|c| c.data.pointer(STORAGE_POINTER))
            .and_then(|v| v.as_str())
            .map(str::to_string)
        else {
            return Ok(());
        };

        let Some(slot) = desired.data.pointer_mut(STORAGE_POINTER) else {
            return Ok(());
        };
        let desired_size = slot.as_str().unwrap_or_default().to_string();

        let (Some(current_bytes), Some(desired_bytes)) =
            (parse_quantity(&current_size), parse_quantity(&desired_size))
        else {
            return Err(InstallerError::InvalidManifest(format!(
                "cannot compare storage quantities '{current_size}' and '{desired_size}'"
            )));
        };

        if current_bytes > desired_bytes {
            debug!(
                current = %current_size,
                desired = %desired_size,
                "keeping larger size of existing claim"
            );
            *slot = serde_json::Value::String(current_size);
        }
        Ok(())
    }
}

/// Parse a Kubernetes resource quantity into bytes
pub fn parse_quantity(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        _ => return None,
    };
    Some(number * multiplier)
}
