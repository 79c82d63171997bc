use crate::protocol::error::Result;
use crate::protocol::{Request, Response};

/// JSON codec for RPC frames.
///
/// Frame payloads are plain JSON so the protocol stays self-describing and
/// debuggable on the wire; framing (length prefix, size limits) lives in the
/// transport.
///
/// # Example
///
/// ```
/// use roster_common::transport::JsonCodec;
/// use roster_common::protocol::Request;
/// use serde_json::json;
///
/// let request = Request::new("Echo/echo", json!({"n": 42}));
/// let encoded = JsonCodec::encode_request(&request).unwrap();
/// let decoded = JsonCodec::decode_request(&encoded).unwrap();
/// assert_eq!(request, decoded);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    pub fn decode_request(data: &[u8]) -> Result<Request> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    pub fn decode_response(data: &[u8]) -> Result<Response> {
        Ok(serde_json::from_slice(data)?)
    }
}
