//! Opaque continuation tokens for paginated listings.
//!
//! A token is the JSON form of a [`RecordKey`] encoded with URL-safe base64
//! (no padding), so it survives a query string untouched. Clients treat it
//! as an opaque string.

use crate::models::image::RecordKey;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("pagination token is not valid base64")]
    Encoding,
    #[error("pagination token does not describe a resume position")]
    Structure,
    #[error("pagination token belongs to a different listing")]
    ForeignListing,
}

/// Encode a resume key. `None` in, `None` out.
pub fn encode_token(key: Option<&RecordKey>) -> Option<String> {
    key.map(|key| {
        let raw = json!({
            "owner_id": key.owner_id,
            "created_at": key.created_at,
        })
        .to_string();
        URL_SAFE_NO_PAD.encode(raw)
    })
}

/// Decode a token produced by [`encode_token`].
pub fn decode_token(token: Option<&str>) -> Result<Option<RecordKey>, TokenError> {
    let Some(token) = token else {
        return Ok(None);
    };

    let raw = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|_| TokenError::Encoding)?;
    let key: RecordKey = serde_json::from_slice(&raw).map_err(|_| TokenError::Structure)?;
    if key.owner_id.is_empty() || key.created_at.is_empty() {
        return Err(TokenError::Structure);
    }

    Ok(Some(key))
}
