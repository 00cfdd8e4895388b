//! Access-Request encoding and response validation
//!
//! This is the whole wire contract of a PAP client: build one Access-Request,
//! then decide whether a datagram that came back is a genuine answer to it.
//! Both directions are pure functions over byte slices.
//!
//! Response validation runs its checks in a fixed order, and the first
//! failing check decides the error:
//!
//! 1. the datagram holds at least a header and at most [`MAX_PACKET_SIZE`] bytes
//! 2. the header length field equals the number of bytes received
//! 3. the identifier equals the one the request was sent with
//! 4. the Response Authenticator verifies against the request authenticator
//!    and the shared secret
//! 5. the code is Access-Accept or Access-Reject

use crate::attributes::{Attribute, AttributeType};
use crate::auth::{
    calculate_response_authenticator, encrypt_user_password, verify_response_authenticator,
};
use crate::packet::{Code, Packet, PacketError};
use thiserror::Error;

/// Largest datagram sent or accepted
pub const MAX_PACKET_SIZE: usize = Packet::MAX_PACKET_SIZE;

/// Largest User-Password value after padding (RFC 2865 Section 5.2)
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Why a received datagram is not an acceptable answer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram shorter than a RADIUS header: {0} bytes")]
    Truncated(usize),
    #[error("datagram larger than {max} bytes: {0} bytes", max = MAX_PACKET_SIZE)]
    Oversized(usize),
    #[error("length field {declared} does not match {received} bytes received")]
    MalformedLength { declared: usize, received: usize },
    #[error("identifier mismatch: expected {expected}, got {received}")]
    IdentifierMismatch { expected: u8, received: u8 },
    #[error("response authenticator mismatch")]
    AuthenticatorMismatch,
    #[error("unexpected response code {0}")]
    UnexpectedCode(u8),
    #[error("malformed attributes: {0}")]
    Attributes(PacketError),
}

impl DecodeError {
    /// True when the datagram cannot be acted upon at all (garbage, stray,
    /// stale, spoofed or malformed) and must be dropped. Only an authenticated
    /// response with an unsupported code carries a usable verdict.
    pub fn is_droppable(&self) -> bool {
        !matches!(self, DecodeError::UnexpectedCode(_))
    }
}

/// Fields of a well-formed RADIUS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub code: u8,
    pub identifier: u8,
    pub length: usize,
}

/// Everything needed to build one Access-Request
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub identifier: u8,
    pub authenticator: [u8; 16],
    pub username: &'a [u8],
    pub password: &'a [u8],
    pub nas_identifier: Option<&'a [u8]>,
}

/// Verdict carried by an authenticated response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Accept,
    Reject,
}

/// An authenticated Access-Accept or Access-Reject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: ResponseKind,
    pub identifier: u8,
    pub attributes: Vec<Attribute>,
}

impl Response {
    /// First Reply-Message, if the server sent one
    pub fn reply_message(&self) -> Option<String> {
        self.attributes
            .iter()
            .find(|attr| attr.attr_type == AttributeType::ReplyMessage as u8)
            .map(Attribute::as_string_lossy)
    }
}

/// Encode an Access-Request carrying User-Name, User-Password and an
/// optional NAS-Identifier
pub fn encode_access_request(
    request: &AccessRequest<'_>,
    secret: &[u8],
) -> Result<Vec<u8>, PacketError> {
    if request.password.len() > MAX_PASSWORD_LENGTH {
        return Err(PacketError::PasswordTooLong(request.password.len()));
    }

    let mut packet = Packet::new(Code::AccessRequest, request.identifier, request.authenticator);
    packet.add_attribute(Attribute::bytes(
        AttributeType::UserName as u8,
        request.username,
    )?);
    packet.add_attribute(Attribute::new(
        AttributeType::UserPassword as u8,
        encrypt_user_password(request.password, secret, &request.authenticator),
    )?);
    if let Some(nas_identifier) = request.nas_identifier {
        packet.add_attribute(Attribute::bytes(
            AttributeType::NasIdentifier as u8,
            nas_identifier,
        )?);
    }

    packet.encode()
}

/// Encode an authenticated response to a request. This is the server side of
/// the exchange, used by test harnesses and tooling.
pub fn encode_response(
    code: Code,
    identifier: u8,
    request_authenticator: &[u8; 16],
    attributes: Vec<Attribute>,
    secret: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let mut packet = Packet::new(code, identifier, [0u8; 16]);
    packet.attributes = attributes;
    let mut bytes = packet.encode()?;

    let authenticator = calculate_response_authenticator(&bytes, request_authenticator, secret)?;
    bytes[4..Packet::HEADER_SIZE].copy_from_slice(&authenticator);
    Ok(bytes)
}

/// Check size and length field of a datagram and return its header
pub fn read_header(buffer: &[u8]) -> Result<Header, DecodeError> {
    if buffer.len() < Packet::HEADER_SIZE {
        return Err(DecodeError::Truncated(buffer.len()));
    }
    if buffer.len() > MAX_PACKET_SIZE {
        return Err(DecodeError::Oversized(buffer.len()));
    }

    let declared = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
    if declared != buffer.len() {
        return Err(DecodeError::MalformedLength {
            declared,
            received: buffer.len(),
        });
    }

    Ok(Header {
        code: buffer[0],
        identifier: buffer[1],
        length: declared,
    })
}

/// Validate a datagram against the request it should answer
pub fn decode_response(
    buffer: &[u8],
    expected_identifier: u8,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<Response, DecodeError> {
    let header = read_header(buffer)?;

    if header.identifier != expected_identifier {
        return Err(DecodeError::IdentifierMismatch {
            expected: expected_identifier,
            received: header.identifier,
        });
    }

    if !verify_response_authenticator(buffer, request_authenticator, secret) {
        return Err(DecodeError::AuthenticatorMismatch);
    }

    let kind = match Code::from_u8(header.code) {
        Some(Code::AccessAccept) => ResponseKind::Accept,
        Some(Code::AccessReject) => ResponseKind::Reject,
        _ => return Err(DecodeError::UnexpectedCode(header.code)),
    };

    let attributes =
        Attribute::decode_all(&buffer[Packet::HEADER_SIZE..]).map_err(DecodeError::Attributes)?;

    Ok(Response {
        kind,
        identifier: header.identifier,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::decrypt_user_password;

    const SECRET: &[u8] = b"testing123";
    const AUTH: [u8; 16] = [
        0x0f, 0x1e, 0x2d, 0x3c, 0x4b, 0x5a, 0x69, 0x78, 0x87, 0x96, 0xa5, 0xb4, 0xc3, 0xd2, 0xe1,
        0xf0,
    ];

    fn alice(identifier: u8) -> AccessRequest<'static> {
        AccessRequest {
            identifier,
            authenticator: AUTH,
            username: b"alice",
            password: b"hunter2",
            nas_identifier: None,
        }
    }

    #[test]
    fn test_encode_alice_scenario() {
        let bytes = encode_access_request(&alice(7), SECRET).unwrap();

        // header(20) + User-Name(2+5) + User-Password(2+16)
        assert_eq!(bytes.len(), 45);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 45);
        assert_eq!(bytes[0], Code::AccessRequest.as_u8());
        assert_eq!(bytes[1], 7);
        assert_eq!(&bytes[4..20], &AUTH);

        let packet = Packet::decode(&bytes).unwrap();
        let user = packet.find_attribute(AttributeType::UserName as u8).unwrap();
        assert_eq!(user.value, b"alice");
        let password = packet
            .find_attribute(AttributeType::UserPassword as u8)
            .unwrap();
        assert_eq!(password.value.len(), 16);
        assert_eq!(
            decrypt_user_password(&password.value, SECRET, &AUTH).unwrap(),
            b"hunter2"
        );
    }

    #[test]
    fn test_decode_alice_accept() {
        let response = encode_response(Code::AccessAccept, 7, &AUTH, vec![], SECRET).unwrap();
        let decoded = decode_response(&response, 7, &AUTH, SECRET).unwrap();
        assert_eq!(decoded.kind, ResponseKind::Accept);
        assert_eq!(decoded.identifier, 7);
    }

    #[test]
    fn test_decode_reject_with_reply_message() {
        let attrs = vec![Attribute::string(AttributeType::ReplyMessage as u8, "nope").unwrap()];
        let response = encode_response(Code::AccessReject, 3, &AUTH, attrs, SECRET).unwrap();
        let decoded = decode_response(&response, 3, &AUTH, SECRET).unwrap();
        assert_eq!(decoded.kind, ResponseKind::Reject);
        assert_eq!(decoded.reply_message().as_deref(), Some("nope"));
    }

    #[test]
    fn test_nas_identifier_is_appended() {
        let request = AccessRequest {
            nas_identifier: Some(&b"web-frontend"[..]),
            ..alice(1)
        };
        let bytes = encode_access_request(&request, SECRET).unwrap();
        assert_eq!(bytes.len(), 45 + 2 + 12);
        let packet = Packet::decode(&bytes).unwrap();
        let nas = packet
            .find_attribute(AttributeType::NasIdentifier as u8)
            .unwrap();
        assert_eq!(nas.value, b"web-frontend");
    }

    #[test]
    fn test_password_lengths_are_deterministic_and_recoverable() {
        for len in 1..=MAX_PASSWORD_LENGTH {
            let password: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
            let request = AccessRequest {
                password: &password,
                ..alice(9)
            };
            let first = encode_access_request(&request, SECRET).unwrap();
            let second = encode_access_request(&request, SECRET).unwrap();
            assert_eq!(first, second);

            let packet = Packet::decode(&first).unwrap();
            assert_eq!(
                packet.find_attribute(AttributeType::UserName as u8).unwrap().value,
                b"alice"
            );
            let hidden = &packet
                .find_attribute(AttributeType::UserPassword as u8)
                .unwrap()
                .value;
            assert_eq!(hidden.len(), len.div_ceil(16) * 16);
            assert_eq!(decrypt_user_password(hidden, SECRET, &AUTH).unwrap(), password);
        }
    }

    #[test]
    fn test_password_too_long() {
        let password = [b'x'; MAX_PASSWORD_LENGTH + 1];
        let request = AccessRequest {
            password: &password,
            ..alice(1)
        };
        assert_eq!(
            encode_access_request(&request, SECRET),
            Err(PacketError::PasswordTooLong(129))
        );
    }

    #[test]
    fn test_username_too_long() {
        let username = [b'u'; 254];
        let request = AccessRequest {
            username: &username,
            ..alice(1)
        };
        assert!(matches!(
            encode_access_request(&request, SECRET),
            Err(PacketError::AttributeError(_))
        ));
    }

    #[test]
    fn test_every_single_bit_flip_is_rejected() {
        let attrs = vec![Attribute::string(AttributeType::ReplyMessage as u8, "welcome").unwrap()];
        let response = encode_response(Code::AccessAccept, 7, &AUTH, attrs, SECRET).unwrap();
        assert!(decode_response(&response, 7, &AUTH, SECRET).is_ok());

        for bit in 0..response.len() * 8 {
            let mut corrupted = response.clone();
            corrupted[bit / 8] ^= 1 << (bit % 8);
            let first = decode_response(&corrupted, 7, &AUTH, SECRET);
            assert!(first.is_err(), "bit {} flip was accepted", bit);
            assert_eq!(first, decode_response(&corrupted, 7, &AUTH, SECRET));
        }
    }

    #[test]
    fn test_wrong_secret_or_request_authenticator() {
        let response = encode_response(Code::AccessAccept, 7, &AUTH, vec![], SECRET).unwrap();
        assert_eq!(
            decode_response(&response, 7, &AUTH, b"wrong"),
            Err(DecodeError::AuthenticatorMismatch)
        );
        assert_eq!(
            decode_response(&response, 7, &[0u8; 16], SECRET),
            Err(DecodeError::AuthenticatorMismatch)
        );
    }

    #[test]
    fn test_identifier_checked_before_authenticator() {
        let response = encode_response(Code::AccessAccept, 8, &AUTH, vec![], b"other").unwrap();
        assert_eq!(
            decode_response(&response, 7, &AUTH, SECRET),
            Err(DecodeError::IdentifierMismatch {
                expected: 7,
                received: 8
            })
        );
    }

    #[test]
    fn test_length_checks() {
        assert_eq!(
            decode_response(&[2, 7, 0, 20], 7, &AUTH, SECRET),
            Err(DecodeError::Truncated(4))
        );

        let mut response = encode_response(Code::AccessAccept, 7, &AUTH, vec![], SECRET).unwrap();
        response.push(0);
        assert_eq!(
            decode_response(&response, 7, &AUTH, SECRET),
            Err(DecodeError::MalformedLength {
                declared: 20,
                received: 21
            })
        );

        let oversized = vec![0u8; MAX_PACKET_SIZE + 1];
        assert_eq!(
            decode_response(&oversized, 7, &AUTH, SECRET),
            Err(DecodeError::Oversized(MAX_PACKET_SIZE + 1))
        );
    }

    #[test]
    fn test_challenge_is_unexpected_code() {
        let response = encode_response(Code::AccessChallenge, 7, &AUTH, vec![], SECRET).unwrap();
        let err = decode_response(&response, 7, &AUTH, SECRET).unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedCode(11));
        assert!(!err.is_droppable());
        assert!(DecodeError::AuthenticatorMismatch.is_droppable());
        assert!(DecodeError::Truncated(3).is_droppable());
    }
}
