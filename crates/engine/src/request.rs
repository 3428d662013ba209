use crate::error::{ErrorKind, Result};

/// Largest serialized transfer request a peer accepts, in bytes.
pub const MAX_REQUEST_BYTES: usize = 65_530;

/// Reject a serialized peer request that is too large to send.
pub fn check_request_size(request: &[u8]) -> Result<()> {
    if request.len() > MAX_REQUEST_BYTES {
        tracing::warn!(size = request.len(), limit = MAX_REQUEST_BYTES, "request too large");
        exn::bail!(ErrorKind::RequestTooLarge { size: request.len(), limit: MAX_REQUEST_BYTES });
    }
    Ok(())
}
