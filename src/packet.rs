//! Wire framing for WAS control packets (§4.1).
//!
//! Every frame is an 8-byte header — little-endian 16-bit kind, 16-bit
//! reserved (zero), 32-bit payload length — followed by that many
//! payload bytes. `Kind`'s numeric values are this implementation's own
//! stable table; the wire protocol fixes a specific numbering that an
//! interoperating peer must match (§9 Open Question (a)).
use byteorder::{ByteOrder, LittleEndian};

use error::Error;

pub const HEADER_LEN: usize = 8;

macro_rules! kinds {
    ($($variant:ident = $value:expr,)*) => {
        /// Numeric identifier of a control packet.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Kind {
            $($variant,)*
        }

        impl Kind {
            fn to_u16(self) -> u16 {
                match self {
                    $(Kind::$variant => $value,)*
                }
            }
            fn from_u16(v: u16) -> Option<Kind> {
                match v {
                    $($value => Some(Kind::$variant),)*
                    _ => None,
                }
            }
        }
    }
}

kinds! {
    Nop = 0,
    Request = 1,
    Method = 2,
    Uri = 3,
    ScriptName = 4,
    PathInfo = 5,
    QueryString = 6,
    Header = 7,
    Parameter = 8,
    RemoteHost = 9,
    Data = 10,
    Length = 11,
    Stop = 12,
    Premature = 13,
    Status = 14,
    NoData = 15,
    End = 16,
    Abort = 17,
    Metric = 18,
}

/// HTTP method of the current request.
///
/// Numeric codes are this implementation's own table, mirroring the
/// open question over `Kind` numbering: the reference server's mapping
/// must be used for interop (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
    Patch,
    Other(u8),
}

impl Method {
    fn to_u8(self) -> u8 {
        match self {
            Method::Get => 1,
            Method::Head => 2,
            Method::Post => 3,
            Method::Put => 4,
            Method::Delete => 5,
            Method::Options => 6,
            Method::Trace => 7,
            Method::Connect => 8,
            Method::Patch => 9,
            Method::Other(n) => n,
        }
    }
    fn from_u8(v: u8) -> Method {
        match v {
            1 => Method::Get,
            2 => Method::Head,
            3 => Method::Post,
            4 => Method::Put,
            5 => Method::Delete,
            6 => Method::Options,
            7 => Method::Trace,
            8 => Method::Connect,
            9 => Method::Patch,
            n => Method::Other(n),
        }
    }

    pub fn as_str(&self) -> &str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Patch => "PATCH",
            Method::Other(_) => "OTHER",
        }
    }
}

impl Default for Method {
    fn default() -> Method { Method::Get }
}

/// A decoded (or about-to-be-encoded) control packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Nop,
    Request,
    Method(Method),
    Uri(Vec<u8>),
    ScriptName(Vec<u8>),
    PathInfo(Vec<u8>),
    QueryString(Vec<u8>),
    Header(Vec<u8>, Vec<u8>),
    Parameter(Vec<u8>, Vec<u8>),
    RemoteHost(Vec<u8>),
    Data,
    Length(u64),
    Stop,
    Premature,
    Status(u16),
    NoData,
    End,
    Abort,
    /// Pair-shaped; an incoming metric request usually has an empty
    /// value, an outgoing metric response carries a 4-byte LE float.
    Metric(Vec<u8>, Vec<u8>),
}

impl Packet {
    fn kind(&self) -> Kind {
        match *self {
            Packet::Nop => Kind::Nop,
            Packet::Request => Kind::Request,
            Packet::Method(_) => Kind::Method,
            Packet::Uri(_) => Kind::Uri,
            Packet::ScriptName(_) => Kind::ScriptName,
            Packet::PathInfo(_) => Kind::PathInfo,
            Packet::QueryString(_) => Kind::QueryString,
            Packet::Header(..) => Kind::Header,
            Packet::Parameter(..) => Kind::Parameter,
            Packet::RemoteHost(_) => Kind::RemoteHost,
            Packet::Data => Kind::Data,
            Packet::Length(_) => Kind::Length,
            Packet::Stop => Kind::Stop,
            Packet::Premature => Kind::Premature,
            Packet::Status(_) => Kind::Status,
            Packet::NoData => Kind::NoData,
            Packet::End => Kind::End,
            Packet::Abort => Kind::Abort,
            Packet::Metric(..) => Kind::Metric,
        }
    }

    /// Build the outgoing metric response packet for `name` / `value`.
    pub fn metric_response(name: &[u8], value: f32) -> Packet {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, value);
        Packet::Metric(name.to_vec(), buf.to_vec())
    }

    /// Interpret this metric packet's value as a 4-byte LE float, if
    /// it's shaped that way.
    pub fn metric_value(&self) -> Option<f32> {
        match *self {
            Packet::Metric(_, ref value) if value.len() == 4 => {
                Some(LittleEndian::read_f32(value))
            }
            _ => None,
        }
    }

    /// Append this packet's wire representation to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::new();
        match *self {
            Packet::Nop | Packet::Request | Packet::Data | Packet::Stop |
            Packet::Premature | Packet::NoData | Packet::End | Packet::Abort => {}
            Packet::Method(m) => payload.push(m.to_u8()),
            Packet::Uri(ref s) | Packet::ScriptName(ref s) |
            Packet::PathInfo(ref s) | Packet::QueryString(ref s) |
            Packet::RemoteHost(ref s) => payload.extend_from_slice(s),
            Packet::Header(ref name, ref value) |
            Packet::Parameter(ref name, ref value) |
            Packet::Metric(ref name, ref value) => {
                let mut len_buf = [0u8; 4];
                LittleEndian::write_u32(&mut len_buf, name.len() as u32);
                payload.extend_from_slice(&len_buf);
                payload.extend_from_slice(name);
                payload.extend_from_slice(value);
            }
            Packet::Length(n) => {
                let mut buf = [0u8; 8];
                LittleEndian::write_u64(&mut buf, n);
                payload.extend_from_slice(&buf);
            }
            Packet::Status(code) => {
                let mut buf = [0u8; 2];
                LittleEndian::write_u16(&mut buf, code);
                payload.extend_from_slice(&buf);
            }
        }
        let mut header = [0u8; HEADER_LEN];
        LittleEndian::write_u16(&mut header[0..2], self.kind().to_u16());
        LittleEndian::write_u32(&mut header[4..8], payload.len() as u32);
        out.extend_from_slice(&header);
        out.extend_from_slice(&payload);
    }
}

/// Decode one whole packet from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet hold a complete frame.
/// Rejects a declared payload length beyond `max_payload_len` before
/// looking at the bytes, so a hostile length field can't force
/// unbounded buffering.
pub fn decode(buf: &[u8], max_payload_len: u32) -> Result<Option<(Packet, usize)>, Error> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let kind_num = LittleEndian::read_u16(&buf[0..2]);
    let len = LittleEndian::read_u32(&buf[4..8]);
    if len > max_payload_len {
        return Err(Error::Protocol("control packet payload too large"));
    }
    let total = HEADER_LEN + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let payload = &buf[HEADER_LEN..total];
    let kind = Kind::from_u16(kind_num)
        .ok_or(Error::Protocol("unknown control packet kind"))?;
    let pkt = decode_payload(kind, payload)?;
    Ok(Some((pkt, total)))
}

fn decode_payload(kind: Kind, payload: &[u8]) -> Result<Packet, Error> {
    fn pair(payload: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
        if payload.len() < 4 {
            return Err(Error::Protocol("truncated name/value pair"));
        }
        let name_len = LittleEndian::read_u32(&payload[0..4]) as usize;
        if 4 + name_len > payload.len() {
            return Err(Error::Protocol("name length exceeds payload"));
        }
        let name = payload[4..4 + name_len].to_vec();
        let value = payload[4 + name_len..].to_vec();
        Ok((name, value))
    }

    Ok(match kind {
        Kind::Nop => Packet::Nop,
        Kind::Request => Packet::Request,
        Kind::Method => {
            if payload.len() != 1 {
                return Err(Error::Protocol("METHOD payload must be 1 byte"));
            }
            Packet::Method(Method::from_u8(payload[0]))
        }
        Kind::Uri => Packet::Uri(payload.to_vec()),
        Kind::ScriptName => Packet::ScriptName(payload.to_vec()),
        Kind::PathInfo => Packet::PathInfo(payload.to_vec()),
        Kind::QueryString => Packet::QueryString(payload.to_vec()),
        Kind::Header => {
            let (name, value) = pair(payload)?;
            Packet::Header(name, value)
        }
        Kind::Parameter => {
            let (name, value) = pair(payload)?;
            Packet::Parameter(name, value)
        }
        Kind::RemoteHost => Packet::RemoteHost(payload.to_vec()),
        Kind::Data => {
            // Open Question (b): a non-empty DATA payload is treated
            // conservatively as a protocol error rather than as
            // out-of-band inlined body bytes.
            if !payload.is_empty() {
                return Err(Error::Protocol("non-empty DATA payload"));
            }
            Packet::Data
        }
        Kind::Length => {
            if payload.len() != 8 {
                return Err(Error::Protocol("LENGTH payload must be 8 bytes"));
            }
            Packet::Length(LittleEndian::read_u64(payload))
        }
        Kind::Stop => Packet::Stop,
        Kind::Premature => Packet::Premature,
        Kind::Status => {
            if payload.len() != 2 {
                return Err(Error::Protocol("STATUS payload must be 2 bytes"));
            }
            Packet::Status(LittleEndian::read_u16(payload))
        }
        Kind::NoData => Packet::NoData,
        Kind::End => Packet::End,
        Kind::Abort => Packet::Abort,
        Kind::Metric => {
            let (name, value) = pair(payload)?;
            Packet::Metric(name, value)
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(pkt: Packet) {
        let mut buf = Vec::new();
        pkt.encode(&mut buf);
        let (decoded, len) = decode(&buf, 65536).unwrap().unwrap();
        assert_eq!(len, buf.len());
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn roundtrip_all_zero_length_kinds() {
        roundtrip(Packet::Nop);
        roundtrip(Packet::Request);
        roundtrip(Packet::Data);
        roundtrip(Packet::Stop);
        roundtrip(Packet::Premature);
        roundtrip(Packet::NoData);
        roundtrip(Packet::End);
        roundtrip(Packet::Abort);
    }

    #[test]
    fn roundtrip_scalar_kinds() {
        roundtrip(Packet::Method(Method::Post));
        roundtrip(Packet::Status(404));
        roundtrip(Packet::Length(123456));
    }

    #[test]
    fn roundtrip_string_kinds() {
        roundtrip(Packet::Uri(b"/foo/bar".to_vec()));
        roundtrip(Packet::ScriptName(b"/app.was".to_vec()));
        roundtrip(Packet::PathInfo(b"/extra".to_vec()));
        roundtrip(Packet::QueryString(b"a=1&b=2".to_vec()));
        roundtrip(Packet::RemoteHost(b"127.0.0.1".to_vec()));
    }

    #[test]
    fn roundtrip_pair_kinds() {
        roundtrip(Packet::Header(b"Content-Type".to_vec(), b"text/plain".to_vec()));
        roundtrip(Packet::Parameter(b"DOCUMENT_ROOT".to_vec(), b"/var/www".to_vec()));
    }

    #[test]
    fn metric_value_roundtrips_as_float() {
        let pkt = Packet::metric_response(b"latency_ms", 12.5);
        let mut buf = Vec::new();
        pkt.encode(&mut buf);
        let (decoded, _) = decode(&buf, 65536).unwrap().unwrap();
        assert_eq!(decoded.metric_value(), Some(12.5));
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut buf = Vec::new();
        Packet::Status(200).encode(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(decode(&buf, 65536).unwrap().is_none());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut buf = [0u8; HEADER_LEN];
        LittleEndian::write_u16(&mut buf[0..2], 7 /* Header */);
        LittleEndian::write_u32(&mut buf[4..8], 10 * 1024 * 1024);
        assert!(decode(&buf, 65536).is_err());
    }

    #[test]
    fn non_empty_data_payload_is_rejected() {
        let mut buf = [0u8; HEADER_LEN + 1];
        LittleEndian::write_u16(&mut buf[0..2], 10 /* Data */);
        LittleEndian::write_u32(&mut buf[4..8], 1);
        buf[8] = b'x';
        assert!(decode(&buf, 65536).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut buf = [0u8; HEADER_LEN];
        LittleEndian::write_u16(&mut buf[0..2], 999);
        assert!(decode(&buf, 65536).is_err());
    }
}
