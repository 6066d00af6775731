//! Persisted gmon layout.
//!
//! All integers are little-endian; records follow the natural C alignment of
//! the target, so address fields are 4 or 8 bytes wide.
//!
//! ```text
//! offset 0:  SizeHeader  { size: u32, reserved: [u32; 3] }   backfilled last
//! offset 16: DescHeader  { magic: b"gmon", version: u32, spare: [u8; 12] }
//!            records:
//!              tag: u8 = 0  HistHeader { low_pc, high_pc, hist_size: u32,
//!                                        prof_rate: u32, dimen: [u8; 15],
//!                                        dimen_abbrev: u8 }
//!                           counters: [u16; hist_size]
//!              tag: u8 = 1  ArcRecord  { from_pc, self_pc, count: u32 }
//! ```
//!
//! `SizeHeader.size` counts the bytes from `DescHeader` to the end of the last
//! record.

use crate::error::{Error, Result};
use crate::session::configuration::PointerWidth;
use crate::util::round_up;

pub const GMON_MAGIC: [u8; 4] = *b"gmon";
pub const GMON_VERSION: u32 = 1;

pub const TAG_TIME_HIST: u8 = 0;
pub const TAG_CG_ARC: u8 = 1;

pub const SIZE_HEADER_LEN: usize = 16;
pub const DESC_HEADER_LEN: usize = 20;
pub const DIMEN_LEN: usize = 15;
pub const TAG_LEN: usize = 1;

/// Sizes of the pointer-width dependent records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordLayout {
    pub width: PointerWidth,
}

impl RecordLayout {
    pub fn new(width: PointerWidth) -> Self {
        Self { width }
    }

    pub fn address_len(&self) -> usize {
        self.width.bytes()
    }

    pub fn hist_header_len(&self) -> usize {
        round_up(2 * self.address_len() + 4 + 4 + DIMEN_LEN + 1, self.address_len())
    }

    pub fn arc_record_len(&self) -> usize {
        round_up(2 * self.address_len() + 4, self.address_len())
    }
}

/// Total stream size, stored in the slot at the start of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeHeader {
    pub size: u32,
}

impl SizeHeader {
    pub fn encode(&self) -> [u8; SIZE_HEADER_LEN] {
        let mut buf = [0u8; SIZE_HEADER_LEN];
        buf[..4].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; SIZE_HEADER_LEN]) -> Self {
        Self {
            size: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DescHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub spare: [u8; 12],
}

impl Default for DescHeader {
    fn default() -> Self {
        Self {
            magic: GMON_MAGIC,
            version: GMON_VERSION,
            spare: [0; 12],
        }
    }
}

impl DescHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.spare);
    }

    pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self> {
        let start = cursor.offset();
        let magic: [u8; 4] = cursor.array()?;
        if magic != GMON_MAGIC {
            return Err(Error::corrupt(start, format!("bad magic {:02x?}", magic)));
        }
        Ok(Self {
            magic,
            version: cursor.u32()?,
            spare: cursor.array()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistHeader {
    pub low_pc: usize,
    pub high_pc: usize,
    pub hist_size: u32,
    pub prof_rate: u32,
    pub dimen: [u8; DIMEN_LEN],
    pub dimen_abbrev: u8,
}

impl HistHeader {
    /// `dimen` as text, without NUL padding.
    pub fn dimension(&self) -> String {
        let end = self
            .dimen
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DIMEN_LEN);
        String::from_utf8_lossy(&self.dimen[..end]).into_owned()
    }

    /// Pack a dimension label into the fixed-size, NUL padded field.
    pub fn pack_dimension(label: &str) -> [u8; DIMEN_LEN] {
        let mut dimen = [0u8; DIMEN_LEN];
        let n = label.len().min(DIMEN_LEN);
        dimen[..n].copy_from_slice(&label.as_bytes()[..n]);
        dimen
    }

    pub fn encode(&self, layout: &RecordLayout, out: &mut Vec<u8>) {
        let start = out.len();
        put_address(out, layout, self.low_pc);
        put_address(out, layout, self.high_pc);
        out.extend_from_slice(&self.hist_size.to_le_bytes());
        out.extend_from_slice(&self.prof_rate.to_le_bytes());
        out.extend_from_slice(&self.dimen);
        out.push(self.dimen_abbrev);
        out.resize(start + layout.hist_header_len(), 0);
    }

    pub fn decode(cursor: &mut Cursor<'_>, layout: &RecordLayout) -> Result<Self> {
        let start = cursor.offset();
        let header = Self {
            low_pc: cursor.address(layout)?,
            high_pc: cursor.address(layout)?,
            hist_size: cursor.u32()?,
            prof_rate: cursor.u32()?,
            dimen: cursor.array()?,
            dimen_abbrev: cursor.u8()?,
        };
        let consumed = cursor.offset() - start;
        cursor.skip(layout.hist_header_len() - consumed)?;
        Ok(header)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistogramRecord {
    pub header: HistHeader,
    pub counters: Vec<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArcRecord {
    pub from_pc: usize,
    pub self_pc: usize,
    pub count: u32,
}

impl ArcRecord {
    pub fn encode(&self, layout: &RecordLayout, out: &mut Vec<u8>) {
        let start = out.len();
        put_address(out, layout, self.from_pc);
        put_address(out, layout, self.self_pc);
        out.extend_from_slice(&self.count.to_le_bytes());
        out.resize(start + layout.arc_record_len(), 0);
    }

    pub fn decode(cursor: &mut Cursor<'_>, layout: &RecordLayout) -> Result<Self> {
        let start = cursor.offset();
        let record = Self {
            from_pc: cursor.address(layout)?,
            self_pc: cursor.address(layout)?,
            count: cursor.u32()?,
        };
        let consumed = cursor.offset() - start;
        cursor.skip(layout.arc_record_len() - consumed)?;
        Ok(record)
    }
}

/// Append one address in the target's width.
///
/// Addresses are validated against the width when the session is created,
/// so truncation here cannot lose bits.
pub fn put_address(out: &mut Vec<u8>, layout: &RecordLayout, address: usize) {
    let address = address as u64;
    match layout.width {
        PointerWidth::Bits32 => out.extend_from_slice(&(address as u32).to_le_bytes()),
        PointerWidth::Bits64 => out.extend_from_slice(&address.to_le_bytes()),
    }
}

/// Bounds-checked little-endian reader over a byte slice.
///
/// Offsets in errors are reported relative to `base`, the stream position
/// of `bytes[0]`.
#[derive(Debug)]
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8], base: usize) -> Self {
        Self {
            bytes,
            pos: 0,
            base,
        }
    }

    /// Stream offset of the next unread byte.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::corrupt(
                self.offset(),
                format!("truncated: need {} bytes, {} left", n, self.remaining()),
            ));
        }
        let bytes: &'a [u8] = self.bytes;
        let slice = &bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn address(&mut self, layout: &RecordLayout) -> Result<usize> {
        let start = self.offset();
        let raw = match layout.width {
            PointerWidth::Bits32 => u32::from_le_bytes(self.array()?) as u64,
            PointerWidth::Bits64 => u64::from_le_bytes(self.array()?),
        };
        usize::try_from(raw).map_err(|_| {
            Error::corrupt(start, format!("address {:#x} does not fit this host", raw))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        let narrow = RecordLayout::new(PointerWidth::Bits32);
        assert_eq!(narrow.hist_header_len(), 32);
        assert_eq!(narrow.arc_record_len(), 12);

        let wide = RecordLayout::new(PointerWidth::Bits64);
        assert_eq!(wide.hist_header_len(), 40);
        assert_eq!(wide.arc_record_len(), 24);
    }

    #[test]
    fn test_desc_header_bytes() {
        let mut out = vec![];
        DescHeader::default().encode(&mut out);
        assert_eq!(out.len(), DESC_HEADER_LEN);
        assert_eq!(&out[..8], b"gmon\x01\x00\x00\x00");
        assert!(out[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_desc_header_bad_magic() {
        let bytes = *b"gnom\x01\x00\x00\x00\0\0\0\0\0\0\0\0\0\0\0\0";
        let err = DescHeader::decode(&mut Cursor::new(&bytes, 16)).unwrap_err();
        assert!(matches!(err, Error::CorruptData { offset: 16, .. }));
    }

    #[test]
    fn test_hist_header_bytes_32bit() {
        let layout = RecordLayout::new(PointerWidth::Bits32);
        let header = HistHeader {
            low_pc: 0x1000,
            high_pc: 0x2000,
            hist_size: 0x400,
            prof_rate: 100,
            dimen: HistHeader::pack_dimension("seconds"),
            dimen_abbrev: b's',
        };
        let mut out = vec![];
        header.encode(&layout, &mut out);
        assert_eq!(out.len(), 32);
        assert_eq!(&out[0..4], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&out[4..8], &[0x00, 0x20, 0x00, 0x00]);
        assert_eq!(&out[8..12], &[0x00, 0x04, 0x00, 0x00]);
        assert_eq!(&out[12..16], &[100, 0, 0, 0]);
        assert_eq!(&out[16..31], b"seconds\0\0\0\0\0\0\0\0");
        assert_eq!(out[31], b's');

        let decoded = HistHeader::decode(&mut Cursor::new(&out, 0), &layout).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.dimension(), "seconds");
    }

    #[test]
    fn test_arc_record_padding_64bit() {
        let layout = RecordLayout::new(PointerWidth::Bits64);
        let record = ArcRecord {
            from_pc: 0x1050,
            self_pc: 0x1300,
            count: 2,
        };
        let mut out = vec![];
        record.encode(&layout, &mut out);
        assert_eq!(out.len(), 24);
        assert_eq!(&out[16..20], &[2, 0, 0, 0]);
        assert_eq!(&out[20..], &[0; 4]);

        let mut cursor = Cursor::new(&out, 0);
        assert_eq!(ArcRecord::decode(&mut cursor, &layout).unwrap(), record);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_truncated_arc_record() {
        let layout = RecordLayout::new(PointerWidth::Bits32);
        let err = ArcRecord::decode(&mut Cursor::new(&[0u8; 10], 0x40), &layout).unwrap_err();
        assert!(matches!(err, Error::CorruptData { offset: 0x48, .. }));
    }

    #[test]
    fn test_size_header() {
        let header = SizeHeader { size: 0x1234 };
        let bytes = header.encode();
        assert_eq!(&bytes[..4], &[0x34, 0x12, 0, 0]);
        assert!(bytes[4..].iter().all(|&b| b == 0));
        assert_eq!(SizeHeader::decode(&bytes), header);
    }
}
