use crate::error::{Error, Result};
use crate::serialization::format::{
    ArcRecord, Cursor, DescHeader, HistHeader, HistogramRecord, RecordLayout, SizeHeader,
    SIZE_HEADER_LEN, TAG_CG_ARC, TAG_LEN, TAG_TIME_HIST,
};
use crate::store::PersistentStore;

/// Receives the decoded contents of a gmon stream in stream order.
///
/// `offset` is the position of the record body (just past its tag) relative
/// to the start of the stream.
pub trait RecordVisitor {
    fn desc_header(&mut self, header: &DescHeader);
    fn histogram(&mut self, offset: usize, record: &HistogramRecord);
    fn arc(&mut self, offset: usize, record: &ArcRecord);
}

/// Decode a gmon stream (everything after the size slot).
///
/// Stops at the end of `stream`; an unknown tag or a record running past
/// the end is `CorruptData`. Returns the number of records visited.
pub fn parse_stream<V: RecordVisitor + ?Sized>(
    stream: &[u8],
    layout: &RecordLayout,
    visitor: &mut V,
) -> Result<usize> {
    let mut cursor = Cursor::new(stream, 0);
    let desc = DescHeader::decode(&mut cursor)?;
    visitor.desc_header(&desc);

    let mut records = 0;
    while !cursor.is_empty() {
        let tag_offset = cursor.offset();
        let tag = cursor.u8()?;
        let offset = tag_offset + TAG_LEN;
        match tag {
            TAG_TIME_HIST => {
                let record = decode_histogram(&mut cursor, layout)?;
                visitor.histogram(offset, &record);
            }
            TAG_CG_ARC => {
                let record = ArcRecord::decode(&mut cursor, layout)?;
                visitor.arc(offset, &record);
            }
            other => {
                return Err(Error::corrupt(
                    tag_offset,
                    format!("unknown record tag {:#04x}", other),
                ));
            }
        }
        records += 1;
    }
    Ok(records)
}

fn decode_histogram(cursor: &mut Cursor<'_>, layout: &RecordLayout) -> Result<HistogramRecord> {
    let header = HistHeader::decode(cursor, layout)?;
    let len = header.hist_size as usize;
    // Validate the length before allocating for it
    let body_start = cursor.offset();
    if len.checked_mul(2).map_or(true, |n| n > cursor.remaining()) {
        return Err(Error::corrupt(
            body_start,
            format!("histogram of {} counters runs past the end", len),
        ));
    }
    let counters = (0..len).map(|_| cursor.u16()).collect::<Result<Vec<_>>>()?;
    Ok(HistogramRecord { header, counters })
}

/// Read the stream length recorded in the size slot of `store`.
pub fn read_size_header<S: PersistentStore + ?Sized>(store: &S) -> Result<usize> {
    let mut buf = [0u8; SIZE_HEADER_LEN];
    store.read_at(0, &mut buf)?;
    Ok(SizeHeader::decode(&buf).size as usize)
}

/// Read the whole persisted stream out of `store`.
///
/// The size slot is checked against the store before anything is allocated:
/// an erased slot or a size running past the end is `CorruptData`.
pub fn read_stream<S: PersistentStore + ?Sized>(store: &S) -> Result<Vec<u8>> {
    let available = store.size()?;
    if available < SIZE_HEADER_LEN {
        return Err(Error::corrupt(
            0,
            format!("store of {} bytes has no size header", available),
        ));
    }
    let size = read_size_header(store)?;
    if size == u32::MAX as usize {
        return Err(Error::corrupt(0, "size header is erased; nothing was saved"));
    }
    if size > available - SIZE_HEADER_LEN {
        return Err(Error::corrupt(
            0,
            format!(
                "size header says {} bytes, the store holds {}",
                size,
                available - SIZE_HEADER_LEN
            ),
        ));
    }
    let mut stream = vec![0u8; size];
    store.read_at(SIZE_HEADER_LEN, &mut stream)?;
    Ok(stream)
}

/// Decode a persisted profile straight from a store, without a session.
pub fn read_store<S, V>(store: &S, layout: &RecordLayout, visitor: &mut V) -> Result<usize>
where
    S: PersistentStore + ?Sized,
    V: RecordVisitor + ?Sized,
{
    let stream = read_stream(store)?;
    parse_stream(&stream, layout, visitor)
}

/// Copy the persisted stream to `out` as a standalone `gmon.out`.
pub fn export_gmon_out<S, W>(store: &S, out: &mut W) -> Result<usize>
where
    S: PersistentStore + ?Sized,
    W: std::io::Write + ?Sized,
{
    let stream = read_stream(store)?;
    out.write_all(&stream).map_err(crate::error::StoreError::from)?;
    Ok(stream.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::GmonDump;
    use crate::serialization::format::DESC_HEADER_LEN;
    use crate::session::configuration::PointerWidth;
    use crate::store::MemoryStore;

    fn layout() -> RecordLayout {
        RecordLayout::new(PointerWidth::Bits32)
    }

    fn stream_with(records: &[u8]) -> Vec<u8> {
        let mut stream = vec![];
        DescHeader::default().encode(&mut stream);
        stream.extend_from_slice(records);
        stream
    }

    fn arc_bytes(from_pc: usize, self_pc: usize, count: u32) -> Vec<u8> {
        let mut out = vec![TAG_CG_ARC];
        ArcRecord {
            from_pc,
            self_pc,
            count,
        }
        .encode(&layout(), &mut out);
        out
    }

    #[test]
    fn test_parse_header_only() {
        let mut dump = GmonDump::default();
        assert_eq!(parse_stream(&stream_with(&[]), &layout(), &mut dump).unwrap(), 0);
        assert_eq!(dump.header, Some(DescHeader::default()));
        assert!(dump.histograms.is_empty());
        assert!(dump.arcs.is_empty());
    }

    #[test]
    fn test_parse_arcs_with_offsets() {
        let mut records = arc_bytes(0x1050, 0x1300, 2);
        records.extend(arc_bytes(0x1100, 0x1a00, 7));

        struct Offsets(Vec<usize>);
        impl RecordVisitor for Offsets {
            fn desc_header(&mut self, _: &DescHeader) {}
            fn histogram(&mut self, offset: usize, _: &HistogramRecord) {
                self.0.push(offset);
            }
            fn arc(&mut self, offset: usize, _: &ArcRecord) {
                self.0.push(offset);
            }
        }

        let mut offsets = Offsets(vec![]);
        let n = parse_stream(&stream_with(&records), &layout(), &mut offsets).unwrap();
        assert_eq!(n, 2);
        assert_eq!(offsets.0, vec![DESC_HEADER_LEN + 1, DESC_HEADER_LEN + 14]);
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut records = arc_bytes(0x1050, 0x1300, 2);
        records.push(7);
        let err = parse_stream(&stream_with(&records), &layout(), &mut GmonDump::default())
            .unwrap_err();
        assert!(matches!(err, Error::CorruptData { offset: 33, .. }));
    }

    #[test]
    fn test_truncated_histogram_is_corrupt() {
        let mut records = vec![TAG_TIME_HIST];
        HistHeader {
            low_pc: 0x1000,
            high_pc: 0x2000,
            hist_size: 0x400,
            prof_rate: 100,
            dimen: HistHeader::pack_dimension("seconds"),
            dimen_abbrev: b's',
        }
        .encode(&layout(), &mut records);
        records.extend_from_slice(&[0u8; 16]);
        let err = parse_stream(&stream_with(&records), &layout(), &mut GmonDump::default())
            .unwrap_err();
        assert!(matches!(err, Error::CorruptData { .. }));
    }

    fn store_with_size_header(size: u32, stream_len: usize) -> MemoryStore {
        let mut bytes = SizeHeader { size }.encode().to_vec();
        bytes.extend(stream_with(&[]));
        bytes.resize(SIZE_HEADER_LEN + stream_len, 0);
        MemoryStore::from_bytes(bytes)
    }

    #[test]
    fn test_read_stream_checks_size_header() {
        let store = store_with_size_header(20, 20);
        assert_eq!(read_stream(&store).unwrap().len(), 20);

        let store = store_with_size_header(200, 20);
        let err = read_stream(&store).unwrap_err();
        assert!(matches!(err, Error::CorruptData { offset: 0, .. }));
    }

    #[test]
    fn test_read_stream_rejects_erased_store() {
        let err = read_stream(&MemoryStore::with_capacity(64)).unwrap_err();
        assert!(matches!(err, Error::CorruptData { offset: 0, .. }));
    }

    #[test]
    fn test_read_stream_rejects_store_without_size_slot() {
        let err = read_stream(&MemoryStore::from_bytes(vec![0; 8])).unwrap_err();
        assert!(matches!(err, Error::CorruptData { offset: 0, .. }));
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        let err = parse_stream(b"gmon", &layout(), &mut GmonDump::default()).unwrap_err();
        assert!(matches!(err, Error::CorruptData { offset: 4, .. }));
    }
}
