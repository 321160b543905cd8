//! Device identification from the basic cluster.

use crate::error::{DeviceError, Result};
use crate::executor::{FallbackExecutor, Strategy};
use crate::mesh::{AttributeValue, DeviceHandle, MeshError, MeshResult, MeshTransport};
use meshdp_core::zcl::{basic_attrs, cluster};
use meshdp_core::Fingerprint;
use tracing::debug;

const IDENTITY: [u16; 2] = [basic_attrs::MANUFACTURER_NAME, basic_attrs::MODEL_IDENTIFIER];

fn text(values: &[(u16, AttributeValue)], attribute: u16) -> Option<String> {
    values
        .iter()
        .find(|(id, _)| *id == attribute)
        .and_then(|(_, v)| match v {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Bytes(b) => String::from_utf8(b.clone()).ok(),
            _ => None,
        })
        .map(|s| s.trim_end_matches('\0').to_string())
        .filter(|s| !s.trim().is_empty())
}

async fn read_one(
    transport: &dyn MeshTransport,
    device: &DeviceHandle,
    attribute: u16,
) -> MeshResult<String> {
    let values = transport
        .read_attributes(&device.id, device.endpoint, cluster::BASIC, &[attribute])
        .await?;
    text(&values, attribute).ok_or_else(|| {
        MeshError::Unsupported(format!("basic attribute 0x{:04x} missing", attribute))
    })
}

/// Read manufacturer and model, first in one request, then one by one.
///
/// Some firmwares answer a combined read with only the first attribute; the
/// per-attribute strategy covers those.
pub async fn identify(
    transport: &dyn MeshTransport,
    executor: &FallbackExecutor,
    device: &DeviceHandle,
) -> Result<Fingerprint> {
    let executed = executor
        .execute(
            "identify",
            vec![
                Strategy::new("combined_read", || async move {
                    let values = transport
                        .read_attributes(&device.id, device.endpoint, cluster::BASIC, &IDENTITY)
                        .await?;
                    match (
                        text(&values, basic_attrs::MANUFACTURER_NAME),
                        text(&values, basic_attrs::MODEL_IDENTIFIER),
                    ) {
                        (Some(manufacturer), Some(model)) => Ok((manufacturer, model)),
                        _ => Err(MeshError::Unsupported(
                            "combined read returned partial identity".to_string(),
                        )),
                    }
                }),
                Strategy::new("per_attribute", || async move {
                    let manufacturer =
                        read_one(transport, device, basic_attrs::MANUFACTURER_NAME).await?;
                    let model = read_one(transport, device, basic_attrs::MODEL_IDENTIFIER).await?;
                    Ok::<_, MeshError>((manufacturer, model))
                }),
            ],
        )
        .await
        .map_err(|e| DeviceError::Identification {
            device: device.id.clone(),
            reason: e.to_string(),
        })?;

    let (manufacturer, model) = executed.value;
    let fingerprint = Fingerprint::new(&manufacturer, &model);
    debug!(
        device_id = %device.id,
        strategy = executed.strategy_name,
        fingerprint = %fingerprint,
        "Device identified"
    );
    Ok(fingerprint)
}
