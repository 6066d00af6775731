pub mod configuration;
pub mod task;

use crate::backtrace::{FrameUnwinder, NoUnwinder, RegisterSnapshot};
use crate::call_graph::{arc_records, ArcTableFull, CallGraph, Recorded};
use crate::error::{Error, Result};
use crate::histogram;
use crate::profile::{ArcIndex, ArenaLayout, HistCounter, ProfileData};
use crate::serialization::deserializer::{read_size_header, read_store, RecordVisitor};
use crate::serialization::format::{ArcRecord, HistHeader, RecordLayout};
use crate::serialization::serializer::ProfileSerializer;
use crate::store::PersistentStore;

use self::configuration::Configuration;
use self::task::{CurrentThread, TaskId, TaskIdentity};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum State {
    Uninit,
    Started,
    Saved,
}

/// One profiling run over a fixed address range.
///
/// Lifecycle: `init` -> `start` -> (`sample` / `record_call`)* -> `save` ->
/// `dump`* -> `deinit`. Only the task that called `start` is profiled.
pub struct Session<S: PersistentStore> {
    configuration: Configuration,
    store: S,
    unwinder: Box<dyn FrameUnwinder>,
    tasks: Box<dyn TaskIdentity>,
    state: State,
    data: Option<ProfileData>,
    next_free: ArcIndex,
    task: Option<TaskId>,
    saved_size: usize,
    dropped_calls: usize,
}

impl<S: PersistentStore> Session<S> {
    pub fn new(configuration: Configuration, store: S) -> Result<Self> {
        configuration.validate()?;
        Ok(Self {
            configuration,
            store,
            unwinder: Box::new(NoUnwinder),
            tasks: Box::new(CurrentThread),
            state: State::Uninit,
            data: None,
            next_free: 0,
            task: None,
            saved_size: 0,
            dropped_calls: 0,
        })
    }

    /// Walk the stack with `unwinder` when a tick lands outside the text.
    pub fn with_unwinder(mut self, unwinder: Box<dyn FrameUnwinder>) -> Self {
        self.unwinder = unwinder;
        self
    }

    pub fn with_task_identity(mut self, tasks: Box<dyn TaskIdentity>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Size the buffers for `[low_pc, high_pc)` and erase the store.
    pub fn init(&mut self, low_pc: usize, high_pc: usize) -> Result<()> {
        if self.state != State::Uninit || self.data.is_some() {
            return Err(self.invalid_state("init"));
        }
        log::debug!("low_pc={:#x}, high_pc={:#x}", low_pc, high_pc);

        let layout = ArenaLayout::for_range(low_pc, high_pc, self.configuration.pointer_width)?;
        let data = ProfileData::allocate(layout)?;

        if let Err(err) = self.store.erase() {
            log::error!("Failed to erase store: {}", err);
            return Err(err.into());
        }

        self.data = Some(data);
        self.next_free = 0;
        self.saved_size = 0;
        self.dropped_calls = 0;
        Ok(())
    }

    /// Begin profiling the calling task.
    pub fn start(&mut self) -> Result<()> {
        if self.state != State::Uninit || self.data.is_none() {
            return Err(self.invalid_state("start"));
        }
        let task = self.tasks.current();
        self.task = Some(task);
        self.state = State::Started;
        log::debug!("profiling started for task {:?}", task);
        Ok(())
    }

    /// Timer tick: attribute the profiled task's registers to a bucket.
    ///
    /// Safe to call from signal context. Returns whether a bucket was
    /// incremented; ticks outside a started session are ignored.
    #[inline]
    pub fn sample(&mut self, registers: &RegisterSnapshot) -> bool {
        if self.state != State::Started {
            return false;
        }
        let Some(data) = self.data.as_mut() else {
            return false;
        };
        histogram::sample(
            &mut data.histogram,
            &data.layout.text,
            &*self.unwinder,
            registers,
        )
    }

    /// Instrumentation hook: `from_return_address` called into `self_pc`.
    ///
    /// Calls from tasks other than the profiled one have no effect. Aborts
    /// the process when the arc table is full.
    pub fn record_call(&mut self, from_return_address: usize, self_pc: usize) -> bool {
        if self.state != State::Started {
            return false;
        }
        if self.task != Some(self.tasks.current()) {
            return false;
        }
        let Some(data) = self.data.as_mut() else {
            return false;
        };

        let from_pc = self.unwinder.return_address_to_pc(from_return_address);
        let mut graph = CallGraph {
            text: data.layout.text,
            log_hash_granularity: data.layout.log_hash_granularity,
            callers: &mut data.callers,
            arcs: &mut data.arcs,
            next_free: &mut self.next_free,
        };
        match graph.record(from_pc, self_pc) {
            Ok(Recorded::NewArc(_)) | Ok(Recorded::Bumped(_)) => true,
            Ok(Recorded::OutOfRange) => {
                log::trace!(
                    "from_pc={:#x} outside [{:#x}, {:#x})",
                    from_pc,
                    data.layout.text.low,
                    data.layout.text.high
                );
                self.dropped_calls += 1;
                false
            }
            Err(ArcTableFull { capacity }) => capacity_exhausted(capacity),
        }
    }

    /// Stop collecting and persist the profile.
    ///
    /// On failure the session stays `Started` and `save` may be retried; the
    /// stream is rewritten from the beginning.
    pub fn save(&mut self) -> Result<()> {
        if self.state != State::Started {
            return Err(self.invalid_state("save"));
        }
        let Some(data) = self.data.as_ref() else {
            return Err(self.invalid_state("save"));
        };
        log::debug!("gprof end");

        let hist_size = u32::try_from(data.histogram.len()).map_err(|_| {
            Error::InvalidArgument(format!(
                "histogram of {} counters exceeds the histogram header",
                data.histogram.len()
            ))
        })?;

        self.saved_size = 0;
        let layout = RecordLayout::new(self.configuration.pointer_width);
        let hist_header = HistHeader {
            low_pc: data.layout.text.low,
            high_pc: data.layout.text.high,
            hist_size,
            prof_rate: self.configuration.sample_rate,
            dimen: HistHeader::pack_dimension(&self.configuration.dimension),
            dimen_abbrev: self.configuration.dimension_abbrev as u8,
        };
        let arcs = arc_records(
            &data.layout.text,
            data.layout.log_hash_granularity,
            &data.callers,
            &data.arcs,
        );

        let mut serializer = ProfileSerializer::new(&mut self.store, layout, &mut self.saved_size);
        serializer.save_desc_header().inspect_err(|e| {
            log::error!("Failed to save gprof header description, error is {}", e)
        })?;
        serializer
            .save_histogram(&hist_header, &data.histogram)
            .inspect_err(|e| log::error!("Failed to save histogram, error is {}", e))?;
        let n_arcs = serializer
            .save_call_graph(arcs, self.configuration.arc_batch_size)
            .inspect_err(|e| log::error!("Failed to save callgraph, error is {}", e))?;
        serializer.save_size_header().inspect_err(|e| {
            log::error!("Failed to save gprof description, error is {}", e)
        })?;

        log::debug!("Saved {} bytes ({} arcs)", self.saved_size, n_arcs);
        self.task = None;
        self.state = State::Saved;
        Ok(())
    }

    /// Decode the persisted profile into `visitor`.
    pub fn dump<V: RecordVisitor + ?Sized>(&self, visitor: &mut V) -> Result<usize> {
        if self.state != State::Saved {
            return Err(self.invalid_state("dump"));
        }
        let recorded = read_size_header(&self.store)?;
        if recorded != self.saved_size {
            return Err(Error::corrupt(
                0,
                format!(
                    "size header says {} bytes, {} were saved",
                    recorded, self.saved_size
                ),
            ));
        }
        let layout = RecordLayout::new(self.configuration.pointer_width);
        read_store(&self.store, &layout, visitor)
    }

    /// Release the buffers and return to `Uninit`.
    pub fn deinit(&mut self) -> Result<()> {
        if self.data.is_none() {
            return Err(self.invalid_state("deinit"));
        }
        self.data = None;
        self.task = None;
        self.next_free = 0;
        self.state = State::Uninit;
        Ok(())
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn layout(&self) -> Option<&ArenaLayout> {
        self.data.as_ref().map(|d| &d.layout)
    }

    pub fn histogram(&self) -> Option<&[HistCounter]> {
        self.data.as_ref().map(|d| &d.histogram[..])
    }

    /// Recorded arcs in bucket order, each chain most recently used first.
    pub fn arcs(&self) -> Vec<ArcRecord> {
        match &self.data {
            Some(d) => arc_records(
                &d.layout.text,
                d.layout.log_hash_granularity,
                &d.callers,
                &d.arcs,
            )
            .collect(),
            None => vec![],
        }
    }

    /// Number of arcs allocated so far.
    pub fn arc_count(&self) -> usize {
        self.next_free as usize
    }

    /// Number of distinct arcs the table can hold.
    pub fn arc_capacity(&self) -> usize {
        self.data
            .as_ref()
            .map_or(0, |d| d.arcs.len().saturating_sub(1))
    }

    /// Calls dropped because the caller was outside the profiled text.
    pub fn dropped_calls(&self) -> usize {
        self.dropped_calls
    }

    /// Bytes of the gmon stream written by the last save attempt.
    pub fn saved_byte_count(&self) -> usize {
        self.saved_size
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state,
        }
    }
}

/// The arc table is sized once from the text size and the persisted layout
/// leaves no room to grow it, so running out aborts the process. Unit tests
/// panic instead so the path can be observed in-process.
#[cold]
#[inline(never)]
fn capacity_exhausted(capacity: usize) -> ! {
    let err = Error::CapacityExhausted { capacity };
    log::error!("{}", err);
    if cfg!(test) {
        panic!("{}", err);
    }
    std::process::abort()
}
