//! Extraction of structured payloads from chatty model output.

use thiserror::Error;

/// The model's reply wrapped no JSON object at all.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no JSON object found in model output")]
pub struct ExtractJsonError;

/// Cut from the first `{` to the last `}` and let serde judge the rest.
///
/// Models regularly wrap structured payloads in prose. This never
/// substitutes an empty object: an absent payload is an error the caller
/// must classify, not a silently valid reply.
pub fn extract_json(text: &str) -> Result<&str, ExtractJsonError> {
    let start = text.find('{').ok_or(ExtractJsonError)?;
    let end = text.rfind('}').ok_or(ExtractJsonError)?;
    if end <= start {
        return Err(ExtractJsonError);
    }
    Ok(&text[start..=end])
}
