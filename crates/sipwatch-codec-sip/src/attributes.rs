//! Attribute ids contributed by the SIP dissector, consumed by the filter
//! engine and display layer in `sipwatch-storage`.

use sipwatch_core::AttributeDef;

pub const METHOD: AttributeDef = AttributeDef::new("method", "Method", "SIP request method, or blank for responses", 8);
pub const STATUS_CODE: AttributeDef = AttributeDef::new("status_code", "Status", "SIP response status code", 6);
pub const CALL_ID: AttributeDef = AttributeDef::new("call_id", "Call-ID", "SIP Call-ID header value", 30);
pub const FROM_URI: AttributeDef = AttributeDef::new("from", "From", "SIP From header value", 24);
pub const TO_URI: AttributeDef = AttributeDef::new("to", "To", "SIP To header value", 24);

pub const ALL: &[AttributeDef] = &[METHOD, STATUS_CODE, CALL_ID, FROM_URI, TO_URI];
