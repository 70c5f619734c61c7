use rand::RngCore;

/// Generates a 16-byte random bearer token, hex-encoded, per spec §4.7.
/// Entropy (128 bits) makes accidental collision across the session
/// cache negligible.
pub fn generate_token() -> String {
    let mut rng = rand::rngs::OsRng;
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    data_encoding::HEXLOWER.encode(&bytes)
}
