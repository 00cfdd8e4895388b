use crate::packet::{Packet, PacketError};
use rand::Rng;

/// Generate a random Request Authenticator (16 bytes) per RFC 2865 Section 3
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut rng = rand::rng();
    let mut authenticator = [0u8; 16];
    rng.fill(&mut authenticator);
    authenticator
}

/// Calculate Response Authenticator per RFC 2865 Section 3
///
/// Response Authenticator = MD5(Code + ID + Length + Request Authenticator + Attributes + Secret)
///
/// `packet_bytes` is the response exactly as it appears on the wire. The
/// authenticator field it carries is ignored and replaced by
/// `request_authenticator` for the computation.
pub fn calculate_response_authenticator(
    packet_bytes: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<[u8; 16], PacketError> {
    if packet_bytes.len() < Packet::HEADER_SIZE {
        return Err(PacketError::InvalidLength(packet_bytes.len()));
    }

    let mut context = md5::Context::new();
    context.consume(&packet_bytes[..4]);
    context.consume(request_authenticator);
    context.consume(&packet_bytes[Packet::HEADER_SIZE..]);
    context.consume(secret);
    Ok(context.compute().0)
}

/// Verify the Response Authenticator carried in `packet_bytes`
pub fn verify_response_authenticator(
    packet_bytes: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    match calculate_response_authenticator(packet_bytes, request_authenticator, secret) {
        Ok(expected) => constant_time_eq(&packet_bytes[4..Packet::HEADER_SIZE], &expected),
        Err(_) => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// MD5(secret + chaining block), the keystream for one User-Password block
fn password_keystream(secret: &[u8], previous_block: &[u8]) -> [u8; 16] {
    let mut context = md5::Context::new();
    context.consume(secret);
    context.consume(previous_block);
    context.compute().0
}

/// Encrypt User-Password attribute per RFC 2865 Section 5.2
///
/// The password is first padded with zeros to a multiple of 16 bytes (an
/// empty password becomes one block), then XORed with
/// MD5(secret + request_authenticator) for the first 16 bytes, and
/// MD5(secret + previous ciphertext block) for subsequent blocks.
pub fn encrypt_user_password(password: &[u8], secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
    let blocks = password.len().div_ceil(16).max(1);
    let mut result = vec![0u8; blocks * 16];
    result[..password.len()].copy_from_slice(password);

    let mut previous_block = *authenticator;
    for chunk in result.chunks_mut(16) {
        let keystream = password_keystream(secret, &previous_block);
        for (byte, key) in chunk.iter_mut().zip(keystream) {
            *byte ^= key;
        }
        previous_block.copy_from_slice(chunk);
    }

    result
}

/// Decrypt User-Password attribute per RFC 2865 Section 5.2
///
/// Trailing zero padding is stripped from the result.
pub fn decrypt_user_password(
    encrypted: &[u8],
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<Vec<u8>, PacketError> {
    if encrypted.is_empty() || encrypted.len() % 16 != 0 {
        return Err(PacketError::AttributeError(format!(
            "Invalid encrypted password length: {}",
            encrypted.len()
        )));
    }

    let mut result = Vec::with_capacity(encrypted.len());
    let mut previous_block: &[u8] = authenticator;

    for chunk in encrypted.chunks(16) {
        let keystream = password_keystream(secret, previous_block);
        result.extend(chunk.iter().zip(keystream).map(|(byte, key)| byte ^ key));
        previous_block = chunk;
    }

    while result.last() == Some(&0) {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_authenticator() {
        let auth1 = generate_request_authenticator();
        let auth2 = generate_request_authenticator();
        assert_ne!(auth1, auth2);
    }

    #[test]
    fn test_password_encryption_decryption() {
        let password = b"mysecretpassword-that-spans-two-blocks";
        let secret = b"sharedsecret";
        let authenticator = [1u8; 16];

        let encrypted = encrypt_user_password(password, secret, &authenticator);
        assert_eq!(encrypted.len(), 48);
        let decrypted = decrypt_user_password(&encrypted, secret, &authenticator).unwrap();
        assert_eq!(decrypted, password);
    }

    #[test]
    fn test_password_encryption_empty() {
        let encrypted = encrypt_user_password(b"", b"sharedsecret", &[1u8; 16]);
        assert_eq!(encrypted.len(), 16);
    }

    #[test]
    fn test_first_block_matches_rfc_construction() {
        let secret = b"testing123";
        let authenticator = [0x42u8; 16];
        let encrypted = encrypt_user_password(b"hunter2", secret, &authenticator);

        let mut keyed = secret.to_vec();
        keyed.extend_from_slice(&authenticator);
        let keystream = md5::compute(&keyed).0;

        let mut padded = [0u8; 16];
        padded[..7].copy_from_slice(b"hunter2");
        let expected: Vec<u8> = padded.iter().zip(keystream).map(|(p, k)| p ^ k).collect();
        assert_eq!(encrypted, expected);
    }

    #[test]
    fn test_decrypt_rejects_partial_block() {
        assert!(decrypt_user_password(&[0u8; 15], b"s", &[0u8; 16]).is_err());
        assert!(decrypt_user_password(&[], b"s", &[0u8; 16]).is_err());
    }

    #[test]
    fn test_response_authenticator_roundtrip() {
        let secret = b"sharedsecret";
        let request_auth = [1u8; 16];
        let mut bytes = vec![2, 42, 0, 20];
        bytes.extend_from_slice(&[0u8; 16]);

        let response_auth = calculate_response_authenticator(&bytes, &request_auth, secret).unwrap();
        bytes[4..20].copy_from_slice(&response_auth);

        assert!(verify_response_authenticator(&bytes, &request_auth, secret));
        assert!(!verify_response_authenticator(&bytes, &request_auth, b"othersecret"));
        assert!(!verify_response_authenticator(&bytes, &[2u8; 16], secret));
    }

    #[test]
    fn test_response_authenticator_short_input() {
        assert!(calculate_response_authenticator(&[2, 1, 0], &[0u8; 16], b"s").is_err());
        assert!(!verify_response_authenticator(&[2, 1, 0], &[0u8; 16], b"s"));
    }
}
