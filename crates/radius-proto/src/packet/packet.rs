use super::Code;
use crate::attributes::Attribute;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),
    #[error("Invalid packet code: {0}")]
    InvalidCode(u8),
    #[error("Attribute error: {0}")]
    AttributeError(String),
    #[error("Packet too large: {0} bytes (max {max})", max = Packet::MAX_PACKET_SIZE)]
    PacketTooLarge(usize),
    #[error("User-Password too long: {0} bytes (max {max})", max = crate::codec::MAX_PASSWORD_LENGTH)]
    PasswordTooLong(usize),
}

/// RADIUS Packet structure as defined in RFC 2865 Section 3
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Code      |  Identifier   |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// |                         Authenticator                         |
/// |                                                               |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Attributes ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet type (1 byte)
    pub code: Code,
    /// Packet identifier for matching requests/responses (1 byte)
    pub identifier: u8,
    /// Request or Response Authenticator (16 bytes)
    pub authenticator: [u8; 16],
    /// List of attributes
    pub attributes: Vec<Attribute>,
}

impl Packet {
    /// Header size (1 code + 1 id + 2 length + 16 authenticator)
    pub const HEADER_SIZE: usize = 20;
    /// Largest datagram this client sends or accepts
    pub const MAX_PACKET_SIZE: usize = 1024;

    pub fn new(code: Code, identifier: u8, authenticator: [u8; 16]) -> Self {
        Packet {
            code,
            identifier,
            authenticator,
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Encode packet to bytes
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let total_length = self.length();
        if total_length > Self::MAX_PACKET_SIZE {
            return Err(PacketError::PacketTooLarge(total_length));
        }

        let mut buffer = Vec::with_capacity(total_length);
        buffer.push(self.code.as_u8());
        buffer.push(self.identifier);
        buffer.extend_from_slice(&(total_length as u16).to_be_bytes());
        buffer.extend_from_slice(&self.authenticator);

        for attr in &self.attributes {
            attr.encode_into(&mut buffer)?;
        }

        Ok(buffer)
    }

    /// Decode packet from bytes
    ///
    /// Octets past the declared length are ignored, as RFC 2865 treats them as
    /// padding. Callers that need an exact match must check it themselves.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::HEADER_SIZE {
            return Err(PacketError::InvalidLength(data.len()));
        }

        let code = Code::from_u8(data[0]).ok_or(PacketError::InvalidCode(data[0]))?;
        let identifier = data[1];
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;

        if !(Self::HEADER_SIZE..=Self::MAX_PACKET_SIZE).contains(&length) {
            return Err(PacketError::InvalidLength(length));
        }
        if data.len() < length {
            return Err(PacketError::InvalidLength(data.len()));
        }

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&data[4..Self::HEADER_SIZE]);

        let attributes = Attribute::decode_all(&data[Self::HEADER_SIZE..length])?;

        Ok(Packet {
            code,
            identifier,
            authenticator,
            attributes,
        })
    }

    /// Get the length of the encoded packet
    pub fn length(&self) -> usize {
        Self::HEADER_SIZE
            + self
                .attributes
                .iter()
                .map(Attribute::encoded_length)
                .sum::<usize>()
    }

    /// Find first attribute by type
    pub fn find_attribute(&self, attr_type: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeType;

    #[test]
    fn test_packet_encode_decode() {
        let mut packet = Packet::new(Code::AccessRequest, 42, [1u8; 16]);
        packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "bob").unwrap());
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded.len(), 25);
        assert_eq!(&encoded[2..4], &[0, 25]);

        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_packet_min_size() {
        let data = vec![0u8; 19];
        assert_eq!(Packet::decode(&data), Err(PacketError::InvalidLength(19)));
    }

    #[test]
    fn test_packet_too_large() {
        let mut packet = Packet::new(Code::AccessRequest, 1, [0u8; 16]);
        for _ in 0..5 {
            packet.add_attribute(Attribute::new(AttributeType::ReplyMessage as u8, vec![b'x'; 253]).unwrap());
        }
        assert_eq!(packet.encode(), Err(PacketError::PacketTooLarge(20 + 5 * 255)));
    }

    #[test]
    fn test_decode_ignores_trailing_padding() {
        let packet = Packet::new(Code::AccessAccept, 9, [7u8; 16]);
        let mut encoded = packet.encode().unwrap();
        encoded.extend_from_slice(&[0, 0, 0]);
        assert_eq!(Packet::decode(&encoded).unwrap(), packet);
    }
}
