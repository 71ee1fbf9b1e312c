//! SIP message dissector: parsing, typed/well-known headers, transaction
//! keying and the attribute ids the filter engine and display layer key on.

pub mod attributes;
pub mod dissector;
pub mod error;
pub mod message;
pub mod parse;
pub mod transaction;

pub use dissector::{message_of, SipDissector, ID_SIP};
pub use error::SipParseError;
pub use message::{HeaderMap, Method, SipMessage, StartLine};
pub use transaction::TransactionKey;
