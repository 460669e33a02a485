//! Decoding credentials out of message attachments.
//!
//! Each attachment is tried as a JWT credential, then an SD-JWT, then plain
//! JSON. A JSON presentation wrapper (`presentation_submission` plus
//! `verifiableCredential`) is unwrapped one level. Anything that fails to
//! decode is logged and skipped.

use clearance_core::{decode_base64url, Attachment, RawCredential};
use serde_json::Value;

/// Every credential that decodes from `attachments`, in attachment order.
pub fn decode_candidates(attachments: &[Attachment]) -> Vec<RawCredential> {
    let mut out = Vec::new();
    for (index, attachment) in attachments.iter().enumerate() {
        if let Some(encoded) = &attachment.data.base64 {
            match decode_base64url(encoded).map(String::from_utf8) {
                Ok(Ok(text)) => decode_text(&text, index, &mut out),
                _ => tracing::debug!(index, "attachment base64 payload is not UTF-8 text"),
            }
        }
        if let Some(json) = &attachment.data.json {
            decode_json(json, index, true, &mut out);
        }
    }
    out
}

/// A compact token or JSON text.
fn decode_text(text: &str, index: usize, out: &mut Vec<RawCredential>) {
    let text = text.trim();

    match RawCredential::from_jwt(text) {
        Ok(raw) => return out.push(raw),
        Err(e) => tracing::trace!(index, error = %e, "not a JWT credential"),
    }
    match RawCredential::from_sd_jwt(text) {
        Ok(raw) => return out.push(raw),
        Err(e) => tracing::trace!(index, error = %e, "not an SD-JWT credential"),
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value) => decode_json(&value, index, true, out),
        Err(_) => tracing::debug!(index, "attachment matched no credential format"),
    }
}

fn decode_json(value: &Value, index: usize, unwrap: bool, out: &mut Vec<RawCredential>) {
    match value {
        Value::String(token) => {
            // A bare token inside JSON gets the token decoders only.
            if let Ok(raw) = RawCredential::from_jwt(token) {
                out.push(raw);
            } else if let Ok(raw) = RawCredential::from_sd_jwt(token) {
                out.push(raw);
            } else {
                tracing::debug!(index, "JSON string attachment is not a credential token");
            }
        }
        Value::Object(obj) if unwrap && is_presentation(obj) => {
            let inner = match obj.get("verifiableCredential") {
                Some(Value::Array(items)) => items.clone(),
                Some(single) => vec![single.clone()],
                None => Vec::new(),
            };
            if inner.is_empty() {
                tracing::debug!(index, "presentation wrapper holds no credentials");
            }
            for item in &inner {
                decode_json(item, index, false, out);
            }
        }
        Value::Object(_) => match RawCredential::from_json(value) {
            Ok(raw) => out.push(raw),
            Err(e) => tracing::debug!(index, error = %e, "JSON attachment is not a credential"),
        },
        _ => tracing::debug!(index, "attachment JSON has unexpected type"),
    }
}

fn is_presentation(obj: &serde_json::Map<String, Value>) -> bool {
    obj.contains_key("presentation_submission")
        || (obj.contains_key("verifiableCredential") && !obj.contains_key("credentialSubject"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearance_core::{encode_base64url, CredentialFormat};
    use serde_json::json;

    fn jwt(payload: Value) -> String {
        let b64 = |v: &Value| encode_base64url(v.to_string().as_bytes());
        format!(
            "{}.{}.{}",
            b64(&json!({"alg": "EdDSA"})),
            b64(&payload),
            encode_base64url(&[1u8; 64])
        )
    }

    fn vc_payload() -> Value {
        json!({
            "iss": "did:web:issuer",
            "vc": {"credentialSubject": {"clearanceLevel": "SECRET"}}
        })
    }

    #[test]
    fn test_base64_jwt_attachment() {
        let att = Attachment::base64(&jwt(vc_payload()), "application/jwt");
        let found = decode_candidates(&[att]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].format, CredentialFormat::Jwt);
    }

    #[test]
    fn test_json_credential_attachment() {
        let att = Attachment::json(json!({
            "issuer": "did:web:issuer",
            "credentialSubject": {"clearanceLevel": "INTERNAL"}
        }));
        let found = decode_candidates(&[att]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].format, CredentialFormat::Json);
    }

    #[test]
    fn test_presentation_submission_unwrapped_once() {
        let att = Attachment::json(json!({
            "presentation_submission": {"id": "ps-1", "descriptor_map": []},
            "verifiableCredential": [
                jwt(vc_payload()),
                {
                    // A nested wrapper is not unwrapped again.
                    "presentation_submission": {},
                    "verifiableCredential": [jwt(vc_payload())]
                }
            ]
        }));
        let found = decode_candidates(&[att]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].format, CredentialFormat::Jwt);
    }

    #[test]
    fn test_garbage_is_skipped_not_fatal() {
        let attachments = vec![
            Attachment::base64("definitely not a credential", "text/plain"),
            Attachment::json(json!([1, 2, 3])),
            Attachment::json(json!({"hello": "world"})),
            Attachment::base64(&jwt(vc_payload()), "application/jwt"),
        ];
        let found = decode_candidates(&attachments);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_json_text_in_base64_attachment() {
        let doc = json!({"issuer": "did:web:issuer", "subject": {"clearanceLevel": 2}});
        let att = Attachment::base64(&doc.to_string(), "application/json");
        let found = decode_candidates(&[att]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].document, doc);
    }
}
