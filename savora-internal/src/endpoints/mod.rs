use crate::error::{Error, ErrorDetails};

pub mod fallback;
pub mod plan;
pub mod status;
pub mod subscription;

/// Device id validation shared by every client-facing endpoint. A missing or
/// blank id is a client error, rejected before any store access.
pub fn require_device_id(device_id: &str) -> Result<&str, Error> {
    let trimmed = device_id.trim();
    if trimmed.is_empty() {
        return Err(Error::new(ErrorDetails::InvalidRequest {
            message: "`device_id` must be provided".to_string(),
        }));
    }
    Ok(trimmed)
}
