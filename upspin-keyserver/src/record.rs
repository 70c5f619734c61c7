use ed25519_dalek::VerifyingKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey as EcdhPublicKey;

use upspin_pack::PublicKeys;
use upspin_path::UserName;
use upspin_types::{Endpoint, Error, Transport};

/// A user's published record: where their directory and store live, and
/// the public key material the packing pipeline wraps keys/verifies
/// signatures against. Returned by value everywhere (per §4.6, "looked-up
/// records are returned by value so callers cannot mutate internal
/// state").
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub name: UserName,
    pub directory_endpoints: Vec<Endpoint>,
    pub store_endpoints: Vec<Endpoint>,
    pub public_keys: PublicKeys,
}

fn write_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

fn read_uvarint(buf: &[u8], pos: &mut usize) -> Result<u64, Error> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| Error::invalid("truncated varint"))?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::invalid("varint too long"));
        }
    }
}

fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_uvarint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8], Error> {
    let len = read_uvarint(buf, pos)? as usize;
    let end = pos
        .checked_add(len)
        .ok_or_else(|| Error::invalid("length overflow"))?;
    buf.get(*pos..end)
        .map(|slice| {
            *pos = end;
            slice
        })
        .ok_or_else(|| Error::invalid("truncated field"))
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<String, Error> {
    let bytes = read_bytes(buf, pos)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::invalid(e.to_string()))
}

fn write_endpoint(buf: &mut Vec<u8>, endpoint: &Endpoint) {
    let tag: u8 = match endpoint.transport {
        Transport::Unassigned => 0,
        Transport::InProcess => 1,
        Transport::Remote => 2,
    };
    buf.push(tag);
    write_str(buf, &endpoint.net_address);
}

fn read_endpoint(buf: &[u8], pos: &mut usize) -> Result<Endpoint, Error> {
    let tag = *buf
        .get(*pos)
        .ok_or_else(|| Error::invalid("truncated endpoint tag"))?;
    *pos += 1;
    let transport = match tag {
        0 => Transport::Unassigned,
        1 => Transport::InProcess,
        2 => Transport::Remote,
        other => return Err(Error::invalid(format!("unknown transport tag {other}"))),
    };
    let net_address = read_string(buf, pos)?;
    Ok(Endpoint {
        transport,
        net_address,
    })
}

fn write_endpoints(buf: &mut Vec<u8>, endpoints: &[Endpoint]) {
    write_uvarint(buf, endpoints.len() as u64);
    for endpoint in endpoints {
        write_endpoint(buf, endpoint);
    }
}

fn read_endpoints(buf: &[u8], pos: &mut usize) -> Result<Vec<Endpoint>, Error> {
    let count = read_uvarint(buf, pos)? as usize;
    let mut endpoints = Vec::with_capacity(count);
    for _ in 0..count {
        endpoints.push(read_endpoint(buf, pos)?);
    }
    Ok(endpoints)
}

/// Serializes a [`UserRecord`] to its canonical byte form, used by the
/// durable key store to persist records through a plain blob backend.
pub fn marshal(record: &UserRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    write_str(&mut buf, &record.name.to_string());
    write_endpoints(&mut buf, &record.directory_endpoints);
    write_endpoints(&mut buf, &record.store_endpoints);
    write_bytes(&mut buf, record.public_keys.signing.as_bytes());
    write_bytes(
        &mut buf,
        record.public_keys.ecdh.to_encoded_point(true).as_bytes(),
    );
    buf
}

/// Parses bytes produced by [`marshal`] back into a [`UserRecord`].
pub fn unmarshal(buf: &[u8]) -> Result<UserRecord, Error> {
    let mut pos = 0usize;

    let name = UserName::parse(&read_string(buf, &mut pos)?).map_err(|e| Error::invalid(e.to_string()))?;
    let directory_endpoints = read_endpoints(buf, &mut pos)?;
    let store_endpoints = read_endpoints(buf, &mut pos)?;

    let signing_bytes = read_bytes(buf, &mut pos)?;
    let signing = VerifyingKey::from_bytes(
        signing_bytes
            .try_into()
            .map_err(|_| Error::invalid("malformed signing key"))?,
    )
    .map_err(|e| Error::invalid(e.to_string()))?;

    let ecdh_bytes = read_bytes(buf, &mut pos)?;
    let ecdh =
        EcdhPublicKey::from_sec1_bytes(ecdh_bytes).map_err(|e| Error::invalid(e.to_string()))?;

    Ok(UserRecord {
        name,
        directory_endpoints,
        store_endpoints,
        public_keys: PublicKeys { signing, ecdh },
    })
}
