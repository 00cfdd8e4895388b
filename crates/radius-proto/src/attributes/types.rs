/// RADIUS Attribute Types used by a PAP client (RFC 2865)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttributeType {
    /// User-Name (1) - RFC 2865
    UserName = 1,
    /// User-Password (2) - RFC 2865
    UserPassword = 2,
    /// Reply-Message (18) - RFC 2865
    ReplyMessage = 18,
    /// NAS-Identifier (32) - RFC 2865
    NasIdentifier = 32,
}
