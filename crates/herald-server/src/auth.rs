//! API-key authentication.
//!
//! A 32-byte random key is generated on first run and stored hex-encoded at
//! `<data-dir>/api-key` with mode 0600. Every endpoint except the liveness
//! probe requires it in the `X-API-Key` header.

use std::path::Path;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use rand::RngCore;

use crate::api::AppState;
use crate::error::ApiError;

const KEY_FILE: &str = "api-key";

/// Load the key from disk, generating and persisting a fresh one when absent.
pub fn load_or_create_api_key(data_dir: &Path) -> std::io::Result<String> {
    let key_path = data_dir.join(KEY_FILE);

    if let Ok(existing) = std::fs::read_to_string(&key_path) {
        let existing = existing.trim().to_string();
        if !existing.is_empty() {
            tracing::info!(chars = existing.len(), "API key loaded");
            return Ok(existing);
        }
    }

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = hex::encode(bytes);

    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&key_path, &key)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(path = %key_path.display(), "generated new API key");
    Ok(key)
}

/// Reject requests whose `X-API-Key` header does not match.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    // Constant-time comparison to keep the key unguessable by timing.
    use subtle::ConstantTimeEq;
    let presented = presented.as_bytes();
    let expected = state.api_key.as_bytes();
    if presented.len() != expected.len() || presented.ct_eq(expected).unwrap_u8() != 1 {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();

        let first = load_or_create_api_key(dir.path()).unwrap();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));

        let second = load_or_create_api_key(dir.path()).unwrap();
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join(KEY_FILE))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
