use crate::packet::PacketError;

/// RADIUS Attribute structure as defined in RFC 2865 Section 5
///
/// ```text
///  0                   1                   2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Type      |    Length     |  Value ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute type (1 byte)
    pub attr_type: u8,
    /// Attribute value (0-253 bytes)
    pub value: Vec<u8>,
}

impl Attribute {
    /// Minimum attribute length (type + length fields = 2 bytes)
    pub const MIN_LENGTH: usize = 2;
    /// Maximum attribute length (255 bytes including type and length)
    pub const MAX_LENGTH: usize = 255;
    /// Maximum value length (253 bytes)
    pub const MAX_VALUE_LENGTH: usize = 253;

    pub fn new(attr_type: u8, value: Vec<u8>) -> Result<Self, PacketError> {
        if value.len() > Self::MAX_VALUE_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "Attribute {} value too long: {} bytes (max {})",
                attr_type,
                value.len(),
                Self::MAX_VALUE_LENGTH
            )));
        }
        Ok(Attribute { attr_type, value })
    }

    /// Create an attribute from raw bytes
    pub fn bytes(attr_type: u8, value: &[u8]) -> Result<Self, PacketError> {
        Self::new(attr_type, value.to_vec())
    }

    /// Create a string attribute
    pub fn string(attr_type: u8, value: impl Into<String>) -> Result<Self, PacketError> {
        Self::new(attr_type, value.into().into_bytes())
    }

    /// Append the encoded attribute to `buffer`
    pub fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<(), PacketError> {
        let length = self.encoded_length();
        if length > Self::MAX_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "Encoded attribute too long: {} bytes",
                length
            )));
        }

        buffer.push(self.attr_type);
        buffer.push(length as u8);
        buffer.extend_from_slice(&self.value);
        Ok(())
    }

    /// Decode a single attribute from the front of `data`
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "Attribute data too short: {} bytes",
                data.len()
            )));
        }

        let attr_type = data[0];
        let length = data[1] as usize;

        if length < Self::MIN_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "Invalid attribute length: {}",
                length
            )));
        }

        if data.len() < length {
            return Err(PacketError::AttributeError(format!(
                "Insufficient data for attribute: expected {}, got {}",
                length,
                data.len()
            )));
        }

        Ok(Attribute {
            attr_type,
            value: data[Self::MIN_LENGTH..length].to_vec(),
        })
    }

    /// Decode a run of attributes that must exactly fill `data`
    pub fn decode_all(mut data: &[u8]) -> Result<Vec<Self>, PacketError> {
        let mut attributes = Vec::new();
        while !data.is_empty() {
            let attr = Attribute::decode(data)?;
            data = &data[attr.encoded_length()..];
            attributes.push(attr);
        }
        Ok(attributes)
    }

    /// Get the encoded length of this attribute
    pub fn encoded_length(&self) -> usize {
        Self::MIN_LENGTH + self.value.len()
    }

    /// Interpret value as a UTF-8 string, replacing invalid sequences
    pub fn as_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_attribute() {
        let attr = Attribute::string(1, "testuser").unwrap();
        assert_eq!(attr.attr_type, 1);
        assert_eq!(attr.as_string_lossy(), "testuser");
        assert_eq!(attr.encoded_length(), 10);
    }

    #[test]
    fn test_attribute_encode_decode() {
        let attr = Attribute::string(1, "test").unwrap();
        let mut encoded = Vec::new();
        attr.encode_into(&mut encoded).unwrap();
        assert_eq!(encoded, vec![1, 6, b't', b'e', b's', b't']);
        assert_eq!(Attribute::decode(&encoded).unwrap(), attr);
    }

    #[test]
    fn test_max_value_length() {
        assert!(Attribute::new(1, vec![0u8; 253]).is_ok());
        assert!(Attribute::new(1, vec![0u8; 254]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        // length byte below the 2-byte header
        assert!(Attribute::decode(&[1, 1, 0]).is_err());
        // length byte claims more than is present
        assert!(Attribute::decode(&[1, 8, b'a', b'b']).is_err());
    }

    #[test]
    fn test_decode_all() {
        let attrs = Attribute::decode_all(&[1, 3, b'a', 18, 2]).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].value, b"a");
        assert!(attrs[1].value.is_empty());

        assert!(Attribute::decode_all(&[1, 3, b'a', 18]).is_err());
    }
}
