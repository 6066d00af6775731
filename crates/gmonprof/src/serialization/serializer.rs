use crate::error::{Error, Result};
use crate::serialization::format::{
    ArcRecord, DescHeader, HistHeader, RecordLayout, SizeHeader, SIZE_HEADER_LEN, TAG_CG_ARC,
    TAG_TIME_HIST,
};
use crate::store::PersistentStore;

/// Writes a gmon stream to a store, appending after the size slot.
///
/// `saved_size` is the running count of stream bytes written so far and is
/// left wherever the last successful write put it if a write fails.
pub struct ProfileSerializer<'a, S: PersistentStore + ?Sized> {
    store: &'a mut S,
    layout: RecordLayout,
    saved_size: &'a mut usize,
}

impl<'a, S: PersistentStore + ?Sized> ProfileSerializer<'a, S> {
    pub fn new(store: &'a mut S, layout: RecordLayout, saved_size: &'a mut usize) -> Self {
        Self {
            store,
            layout,
            saved_size,
        }
    }

    fn save_buf(&mut self, buf: &[u8]) -> Result<()> {
        let offset = SIZE_HEADER_LEN + *self.saved_size;
        self.store.write_at(offset, buf)?;
        *self.saved_size += buf.len();
        Ok(())
    }

    pub fn save_desc_header(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        DescHeader::default().encode(&mut buf);
        self.save_buf(&buf)
    }

    pub fn save_histogram(&mut self, header: &HistHeader, counters: &[u16]) -> Result<()> {
        debug_assert_eq!(header.hist_size as usize, counters.len());

        let mut buf = vec![TAG_TIME_HIST];
        header.encode(&self.layout, &mut buf);
        self.save_buf(&buf)?;

        let body: Vec<u8> = counters.iter().flat_map(|c| c.to_le_bytes()).collect();
        self.save_buf(&body)
    }

    /// Write every arc, `batch_size` records per store write.
    pub fn save_call_graph<I>(&mut self, arcs: I, batch_size: usize) -> Result<usize>
    where
        I: IntoIterator<Item = ArcRecord>,
    {
        let batch_size = batch_size.max(1);
        let record_len = 1 + self.layout.arc_record_len();
        let mut buf = Vec::with_capacity(batch_size * record_len);
        let mut filled = 0;
        let mut total = 0;

        for arc in arcs {
            buf.push(TAG_CG_ARC);
            arc.encode(&self.layout, &mut buf);
            filled += 1;
            total += 1;

            if filled == batch_size {
                self.save_buf(&buf)?;
                buf.clear();
                filled = 0;
            }
        }

        if filled > 0 {
            self.save_buf(&buf)?;
        }
        Ok(total)
    }

    /// Backfill the size slot at offset 0 with the stream length.
    pub fn save_size_header(&mut self) -> Result<()> {
        let size = u32::try_from(*self.saved_size).map_err(|_| {
            Error::InvalidArgument(format!(
                "profile of {} bytes exceeds the size header",
                self.saved_size
            ))
        })?;
        self.store.write_at(0, &SizeHeader { size }.encode())?;
        Ok(())
    }
}
