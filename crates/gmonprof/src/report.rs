use crate::serialization::deserializer::RecordVisitor;
use crate::serialization::format::{
    ArcRecord, DescHeader, HistogramRecord, TAG_CG_ARC, TAG_TIME_HIST,
};

/// Histogram counters printed per line.
const COUNTERS_PER_LINE: usize = 8;

/// Collects every decoded record.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GmonDump {
    pub header: Option<DescHeader>,
    pub histograms: Vec<HistogramRecord>,
    pub arcs: Vec<ArcRecord>,
}

impl GmonDump {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Arcs sorted by address, independent of chain order.
    pub fn sorted_arcs(&self) -> Vec<ArcRecord> {
        let mut arcs = self.arcs.clone();
        arcs.sort();
        arcs
    }
}

impl RecordVisitor for GmonDump {
    fn desc_header(&mut self, header: &DescHeader) {
        self.header = Some(header.clone());
    }

    fn histogram(&mut self, _offset: usize, record: &HistogramRecord) {
        self.histograms.push(record.clone());
    }

    fn arc(&mut self, _offset: usize, record: &ArcRecord) {
        self.arcs.push(*record);
    }
}

/// Prints every record through `log::info!`.
#[derive(Debug, Default)]
pub struct LogPrinter;

impl RecordVisitor for LogPrinter {
    fn desc_header(&mut self, header: &DescHeader) {
        log::info!("magic: {}", String::from_utf8_lossy(&header.magic));
        log::info!("version: {}", header.version);
        log::info!("spare: {:02x?}", header.spare);
    }

    fn histogram(&mut self, offset: usize, record: &HistogramRecord) {
        let h = &record.header;
        log::info!("offset: {:#x}", offset);
        log::info!("tag: {:02x}", TAG_TIME_HIST);
        log::info!("record: time histogram");
        log::info!("low pc: {:#x}", h.low_pc);
        log::info!("high pc: {:#x}", h.high_pc);
        log::info!("hist size: {}", h.hist_size);
        log::info!("prof rate: {}", h.prof_rate);
        log::info!("dimen: {:?}", h.dimension());
        log::info!(
            "dimen abbrev: {:02x}({})",
            h.dimen_abbrev,
            h.dimen_abbrev as char
        );
        log::info!("hist samples:");
        for (line, chunk) in record.counters.chunks(COUNTERS_PER_LINE).enumerate() {
            let counters: Vec<String> = chunk.iter().map(|c| format!("{:04x}", c)).collect();
            log::info!("{:#06x}\t{}", line * COUNTERS_PER_LINE, counters.join(" "));
        }
    }

    fn arc(&mut self, offset: usize, record: &ArcRecord) {
        log::info!("offset: {:#x}", offset);
        log::info!("tag: {:02x}", TAG_CG_ARC);
        log::info!("record: call-graph");
        log::info!("from_pc: {:#x}", record.from_pc);
        log::info!("self_pc: {:#x}", record.self_pc);
        log::info!("count: {}", record.count);
    }
}
