//! Fixed-size header, flavor tag and the two checksums used by delta files.

/// Magic cookie opening every delta file.
pub const COOKIE: [u8; 8] = *b"$DltF0\n\r";

/// Size of the header fields covered by the CRC-8 (cookie included).
pub const HEADER_BODY_LEN: usize = 36;

/// Full header size on disk, CRC-8 byte included.
pub const HEADER_LEN: usize = HEADER_BODY_LEN + 1;

/// RDF flavor the documents of a file were requested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flavor {
    /// Excludes descriptions of entities referred to in the data.
    Dump = 0,
    /// Only truthy statements, along with sitelinks and version information.
    Simple = 1,
    /// All data.
    Full = 2,
}

impl Flavor {
    /// Convert the on-disk tag into a flavor, if recognized.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Flavor::Dump,
            1 => Flavor::Simple,
            2 => Flavor::Full,
            _ => return None,
        })
    }

    /// Lower-case name, as used in `?flavor=` URL parameters.
    pub fn name(self) -> &'static str {
        match self {
            Flavor::Dump => "dump",
            Flavor::Simple => "simple",
            Flavor::Full => "full",
        }
    }
}

/// Parsed delta file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Number of records that follow the header.
    pub url_count: u64,
    /// Start of the captured range, microseconds since the Unix epoch.
    pub range_start: u64,
    /// End of the captured range, microseconds since the Unix epoch.
    pub range_end: u64,
    pub flavor: Flavor,
}

impl Header {
    /// Serialize the CRC-covered part of the header (without the CRC byte).
    pub fn to_bytes(&self) -> [u8; HEADER_BODY_LEN] {
        let mut buf = [0u8; HEADER_BODY_LEN];
        buf[0..8].copy_from_slice(&COOKIE);
        buf[8..16].copy_from_slice(&self.url_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.range_start.to_le_bytes());
        buf[24..32].copy_from_slice(&self.range_end.to_le_bytes());
        buf[32] = self.flavor as u8;
        // 33..36 padding
        buf
    }

    /// Parse the CRC-covered header bytes. The cookie and the CRC are checked
    /// by the caller; this returns `None` only for an unknown flavor tag.
    pub fn parse(buf: &[u8; HEADER_BODY_LEN]) -> Option<Self> {
        let url_count = u64::from_le_bytes(buf[8..16].try_into().ok()?);
        let range_start = u64::from_le_bytes(buf[16..24].try_into().ok()?);
        let range_end = u64::from_le_bytes(buf[24..32].try_into().ok()?);
        let flavor = Flavor::from_u8(buf[32])?;
        Some(Header {
            url_count,
            range_start,
            range_end,
            flavor,
        })
    }
}

/// Incremental CRC-8 (polynomial 0x07, initial value 0).
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc8 {
    crc: u8,
}

impl Crc8 {
    pub fn update(&mut self, data: &[u8]) {
        for &b in data {
            let mut x = self.crc ^ b;
            for _ in 0..8 {
                x = if x & 0x80 != 0 { (x << 1) ^ 0x07 } else { x << 1 };
            }
            self.crc = x;
        }
    }

    pub fn value(&self) -> u8 {
        self.crc
    }
}

/// Incremental IEEE CRC-32.
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    crc: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Crc32 { crc: 0xFFFF_FFFF }
    }
}

impl Crc32 {
    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.crc;
        for &b in data {
            let mut x = (crc ^ (b as u32)) & 0xFF;
            for _ in 0..8 {
                let lsb = x & 1;
                x >>= 1;
                if lsb != 0 {
                    x ^= 0xEDB88320;
                }
            }
            crc = (crc >> 8) ^ x;
        }
        self.crc = crc;
    }

    pub fn value(&self) -> u32 {
        self.crc ^ 0xFFFF_FFFF
    }
}

/// The running checksum of a stream; the header uses CRC-8, the records CRC-32.
#[derive(Debug, Clone, Copy)]
pub enum Checksum {
    Crc8(Crc8),
    Crc32(Crc32),
}

impl Checksum {
    pub fn crc8() -> Self {
        Checksum::Crc8(Crc8::default())
    }

    pub fn crc32() -> Self {
        Checksum::Crc32(Crc32::default())
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Checksum::Crc8(c) => c.update(data),
            Checksum::Crc32(c) => c.update(data),
        }
    }

    /// Little-endian bytes of the current value: 1 byte for CRC-8, 4 for CRC-32.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Checksum::Crc8(c) => vec![c.value()],
            Checksum::Crc32(c) => c.value().to_le_bytes().to_vec(),
        }
    }

    /// Number of bytes `to_bytes` produces.
    pub fn width(&self) -> usize {
        match self {
            Checksum::Crc8(_) => 1,
            Checksum::Crc32(_) => 4,
        }
    }
}

pub(crate) fn push_uvarint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            break;
        }
    }
}
