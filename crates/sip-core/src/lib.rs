//! # switchboard-sip-core
//!
//! SIP message types, a datagram parser and the builders call control uses to
//! answer and originate dialogs.
//!
//! ```
//! use switchboard_sip_core::prelude::*;
//!
//! let raw = "OPTIONS sip:pbx@10.0.0.1 SIP/2.0\r\nCall-ID: q1\r\nCSeq: 1 OPTIONS\r\n\r\n";
//! let request = parse_message(raw.as_bytes()).unwrap().into_request().unwrap();
//! let response = create_response(&request, StatusCode::Ok);
//! assert_eq!(response.call_id(), Some("q1"));
//! ```

pub mod builder;
pub mod error;
pub mod header;
pub mod message;
pub mod method;
pub mod parser;
pub mod sdp;
pub mod status;
pub mod uri;

pub use error::{Error, Result};
pub use header::{Header, HeaderName};
pub use message::{HeaderAccess, Message, Request, Response};
pub use method::Method;
pub use parser::parse_message;
pub use sdp::SessionDescription;
pub use status::StatusCode;
pub use uri::{NameAddr, Uri};

/// Commonly used items
pub mod prelude {
    pub use crate::builder::{
        create_ack_for_2xx, create_request, create_response, create_response_with_tag,
        generate_branch, generate_call_id, generate_tag, RequestTemplate,
    };
    pub use crate::header::{header_param, Header, HeaderName};
    pub use crate::message::{HeaderAccess, Message, Request, Response};
    pub use crate::method::Method;
    pub use crate::parser::parse_message;
    pub use crate::sdp::{SessionDescription, SDP_CONTENT_TYPE};
    pub use crate::status::StatusCode;
    pub use crate::uri::{NameAddr, Uri};
}
