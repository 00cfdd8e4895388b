//! RADIUS Protocol Implementation for PAP clients
//!
//! This crate provides the subset of RFC 2865 a client needs to check a
//! username and password against a RADIUS server: Access-Request encoding,
//! User-Password hiding, and validation of Access-Accept / Access-Reject
//! responses.
//!
//! # Features
//!
//! - Packet and attribute encoding and decoding (1024 byte datagrams)
//! - MD5-based User-Password encryption
//! - Request/Response Authenticator calculation and verification
//! - Ordered response validation with a typed error per failed check
//!
//! # Example
//!
//! ```rust
//! use radius_proto::auth::generate_request_authenticator;
//! use radius_proto::codec::{decode_response, encode_access_request, encode_response, AccessRequest, ResponseKind};
//! use radius_proto::Code;
//!
//! let request = AccessRequest {
//!     identifier: 1,
//!     authenticator: generate_request_authenticator(),
//!     username: b"alice",
//!     password: b"hunter2",
//!     nas_identifier: None,
//! };
//! let bytes = encode_access_request(&request, b"secret").unwrap();
//! assert_eq!(bytes.len(), 45);
//!
//! // What a server holding the same secret would answer
//! let reply = encode_response(Code::AccessAccept, 1, &request.authenticator, vec![], b"secret").unwrap();
//! let response = decode_response(&reply, 1, &request.authenticator, b"secret").unwrap();
//! assert_eq!(response.kind, ResponseKind::Accept);
//! ```

pub mod attributes;
pub mod auth;
pub mod codec;
pub mod packet;

pub use attributes::{Attribute, AttributeType};
pub use auth::{
    calculate_response_authenticator, decrypt_user_password, encrypt_user_password,
    generate_request_authenticator, verify_response_authenticator,
};
pub use codec::{
    AccessRequest, DecodeError, Header, MAX_PACKET_SIZE, MAX_PASSWORD_LENGTH, Response,
    ResponseKind, decode_response, encode_access_request, encode_response, read_header,
};
pub use packet::{Code, Packet, PacketError};
