/// RADIUS packet codes as defined in RFC 2865 Section 4
///
/// Only the codes that take part in a PAP exchange are modelled. Any other
/// code on the wire is reported to callers as a raw `u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    /// Access-Request (1)
    AccessRequest = 1,
    /// Access-Accept (2)
    AccessAccept = 2,
    /// Access-Reject (3)
    AccessReject = 3,
    /// Access-Challenge (11), recognised but never produced by this client
    AccessChallenge = 11,
}

impl Code {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Code::AccessRequest),
            2 => Some(Code::AccessAccept),
            3 => Some(Code::AccessReject),
            11 => Some(Code::AccessChallenge),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_from_u8() {
        assert_eq!(Code::from_u8(2), Some(Code::AccessAccept));
        assert_eq!(Code::from_u8(11), Some(Code::AccessChallenge));
        assert_eq!(Code::from_u8(4), None);
        assert_eq!(Code::AccessReject.as_u8(), 3);
    }
}
