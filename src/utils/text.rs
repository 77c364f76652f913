//! Text decoding for file content

use crate::error::{RegvaultError, Result};

/// Decode file bytes as UTF-8, dropping a leading BOM.
///
/// Malformed sequences are an error rather than being replaced, so a
/// caller never writes back lossy content.
pub fn decode_utf8(bytes: &[u8]) -> Result<String> {
    let (text, had_errors) = encoding_rs::UTF_8.decode_with_bom_removal(bytes);
    if had_errors {
        return Err(RegvaultError::Encoding(
            "content is not valid UTF-8".to_string(),
        ));
    }
    Ok(text.into_owned())
}
