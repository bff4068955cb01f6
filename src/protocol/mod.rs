//! The request/response document grammar. Parsing and serialization are
//! thin translation layers; numeric attribute values travel as raw strings
//! so a malformed number fails only its own batch child.

pub mod request;
pub mod response;

pub use request::{parse_request, CreateItem, ProtocolError, Request, SymbolAllocation, TxItem};
pub use response::{error_document, render_results, Fill, ResultItem, StatusState};
