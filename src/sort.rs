//! External sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Sender;

use crate::buffer::{Chunk, ChunkAccumulator};
use crate::config::SortConfig;
use crate::record::{RecordValidator, SEPARATOR};
use crate::run::{write_run, RunId, RunReadError};
use crate::topology::{MergeOrchestrator, MergeTopology};

/// Whitespace allowed around a record. Longer input lines are dropped without being buffered whole.
const MAX_LINE_PADDING: usize = 4096;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Inconsistent sorter parameters.
    InvalidConfig(String),
    /// Input data stream error.
    InputError(io::Error),
    /// One or more chunks were not saved. `chunk` is the first failed chunk, `failed` is the number of failures.
    ChunkWriteFailure { chunk: u64, failed: usize, source: io::Error },
    /// Sorting workers stopped before the input was consumed.
    WorkerPoolShutdown,
    /// Run file could not be opened for merging.
    RunOpenFailure { path: PathBuf, source: io::Error },
    /// Run file could not be read or is malformed.
    RunReadFailure(RunReadError),
    /// Merged output (final or intermediate) could not be written.
    OutputWriteFailure(io::Error),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::InvalidConfig(_) => None,
            SortError::InputError(err) => Some(err),
            SortError::ChunkWriteFailure { source, .. } => Some(source),
            SortError::WorkerPoolShutdown => None,
            SortError::RunOpenFailure { source, .. } => Some(source),
            SortError::RunReadFailure(err) => Some(err),
            SortError::OutputWriteFailure(err) => Some(err),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::ChunkWriteFailure { chunk, failed, source } => {
                write!(f, "{} chunk(s) not saved, first failed chunk {}: {}", failed, chunk, source)
            }
            SortError::WorkerPoolShutdown => write!(f, "sorting workers stopped unexpectedly"),
            SortError::RunOpenFailure { path, source } => {
                write!(f, "run {} not opened: {}", path.display(), source)
            }
            SortError::RunReadFailure(err) => write!(f, "run read failed: {}", err),
            SortError::OutputWriteFailure(err) => write!(f, "merged data not saved: {}", err),
        }
    }
}

/// Result of the split phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSummary {
    /// Produced runs in sequence order.
    pub runs: Vec<RunId>,
    /// Number of accepted records.
    pub records: u64,
    /// Number of dropped input lines.
    pub dropped: u64,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone, Default)]
pub struct ExternalSorterBuilder {
    /// Sorting parameters.
    config: SortConfig,
    /// Directory to be used to store runs.
    run_dir: Option<Box<Path>>,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(self.config, self.run_dir.as_deref())
    }

    /// Replaces all the sorting parameters.
    pub fn with_config(mut self, config: SortConfig) -> ExternalSorterBuilder {
        self.config = config;
        return self;
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.config.threads = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store runs. The directory must exist.
    pub fn with_run_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.run_dir = Some(path.into());
        return self;
    }

    /// Sets record length.
    pub fn with_record_length(mut self, record_length: usize) -> ExternalSorterBuilder {
        self.config.record_length = record_length;
        return self;
    }

    /// Sets chunk limits in bytes and in records.
    pub fn with_chunk_limits(mut self, max_bytes: u64, max_records: usize) -> ExternalSorterBuilder {
        self.config.max_chunk_bytes = max_bytes;
        self.config.max_chunk_records = max_records;
        return self;
    }

    /// Sets the number of records every run cursor reads ahead during merging.
    pub fn with_buffer_lines(mut self, buffer_lines: usize) -> ExternalSorterBuilder {
        self.config.buffer_lines = buffer_lines;
        return self;
    }

    /// Sets run read and write buffer sizes.
    pub fn with_rw_buf_size(mut self, read_buf_size: usize, write_buf_size: usize) -> ExternalSorterBuilder {
        self.config.read_buf_size = read_buf_size;
        self.config.write_buf_size = write_buf_size;
        return self;
    }

    /// Sets the number of sealed chunks allowed to wait for a worker.
    pub fn with_queue_depth(mut self, queue_depth: usize) -> ExternalSorterBuilder {
        self.config.queue_depth = queue_depth;
        return self;
    }

    /// Sets merge topology.
    pub fn with_topology(mut self, topology: MergeTopology) -> ExternalSorterBuilder {
        self.config.topology = topology;
        return self;
    }

    /// Keeps source runs after merging.
    pub fn with_keep_runs(mut self, keep_runs: bool) -> ExternalSorterBuilder {
        self.config.keep_runs = keep_runs;
        return self;
    }
}

/// External sorter.
pub struct ExternalSorter {
    /// Sorting and merging thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store runs.
    run_dir: PathBuf,
    /// Temporary directory owned by the sorter, if no run directory was given.
    tmp_dir: Option<tempfile::TempDir>,
    /// Sorting parameters.
    config: SortConfig,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `config` - Sorting parameters
    /// * `run_dir` - Directory to be used to store runs. If the parameter is [`None`] a temporary directory is
    ///   created in the default OS temporary directory and removed with the sorter.
    pub fn new(config: SortConfig, run_dir: Option<&Path>) -> Result<Self, SortError> {
        config.validate().map_err(SortError::InvalidConfig)?;

        let (run_dir, tmp_dir) = match run_dir {
            Some(run_dir) => (run_dir.to_path_buf(), None),
            None => {
                let tmp_dir = Self::init_tmp_directory()?;
                (tmp_dir.path().to_path_buf(), Some(tmp_dir))
            }
        };
        log::info!("using {} as a run directory", run_dir.display());

        return Ok(ExternalSorter {
            thread_pool: Self::init_thread_pool(config.threads)?,
            run_dir,
            tmp_dir,
            config,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new().thread_name(|idx| format!("sort-worker-{}", idx));

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory() -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = tempfile::tempdir().map_err(|err| SortError::TempDir(err))?;
        log::debug!("created temporary directory {}", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Returns the directory runs are stored in.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Returns sorting parameters.
    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Sorts data from the input file and saves it to the output file.
    /// Returns the number of records written.
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<u64, SortError> {
        let input = fs::File::open(input).map_err(SortError::InputError)?;
        let summary = self.split_sort(io::BufReader::with_capacity(self.config.read_buf_size, input))?;

        return self.merge_to_file(&summary.runs, output);
    }

    /// Splits the input into sorted runs.
    ///
    /// Input lines are validated and collected into chunks. Every chunk is sorted and saved by one of the
    /// thread pool workers. The method returns once all the workers are done.
    ///
    /// # Arguments
    /// * `input` - Input stream of newline delimited records
    pub fn split_sort<R: BufRead>(&self, input: R) -> Result<SplitSummary, SortError> {
        let workers = self.thread_pool.current_num_threads();
        log::info!(
            "splitting input (workers: {}, queue depth: {})",
            workers,
            self.config.queue_depth
        );

        let (sender, receiver) = crossbeam_channel::bounded::<Chunk>(self.config.queue_depth);
        let spilled = Mutex::new(Vec::new());
        let failures = Mutex::new(Vec::new());

        let accumulated = self.thread_pool.in_place_scope(|scope| {
            for worker in 0..workers {
                let receiver = receiver.clone();
                let spilled = &spilled;
                let failures = &failures;

                scope.spawn(move |_| {
                    for chunk in receiver.iter() {
                        let chunk_id = chunk.id();
                        match self.spill_chunk(chunk) {
                            Ok(run) => lock(spilled).push(run),
                            Err(err) => {
                                log::error!("worker {}: chunk {} not saved: {}", worker, chunk_id, err);
                                lock(failures).push((chunk_id, err));
                            }
                        }
                    }
                    log::debug!("worker {} finished", worker);
                });
            }
            drop(receiver);

            self.accumulate(input, sender)
        });

        let (records, dropped) = accumulated?;

        let mut failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
        if !failures.is_empty() {
            failures.sort_by_key(|(chunk_id, _)| *chunk_id);
            let failed = failures.len();
            let (chunk, source) = failures.swap_remove(0);
            return Err(SortError::ChunkWriteFailure { chunk, failed, source });
        }

        let mut runs = spilled.into_inner().unwrap_or_else(PoisonError::into_inner);
        runs.sort();
        log::info!(
            "input split into {} runs ({} records, {} lines dropped)",
            runs.len(),
            records,
            dropped
        );

        return Ok(SplitSummary { runs, records, dropped });
    }

    /// Reads the input, hands sealed chunks over to the workers. Returns accepted and dropped lines counts.
    /// The queue is closed when the sender is dropped, on success and on failure alike.
    fn accumulate<R: BufRead>(&self, mut input: R, queue: Sender<Chunk>) -> Result<(u64, u64), SortError> {
        let validator = RecordValidator::new(self.config.record_length);
        let mut accumulator = ChunkAccumulator::new(self.config.chunk_limits());
        let line_limit = (validator.record_length() + MAX_LINE_PADDING) as u64;
        let mut line = Vec::new();
        let mut records = 0;
        let mut dropped = 0;

        loop {
            line.clear();
            let read = input
                .by_ref()
                .take(line_limit)
                .read_until(SEPARATOR, &mut line)
                .map_err(SortError::InputError)?;
            if read == 0 {
                break;
            }

            if read as u64 == line_limit && line.last() != Some(&SEPARATOR) {
                skip_line(&mut input).map_err(SortError::InputError)?;
                log::trace!("line longer than {} bytes dropped", line_limit);
                dropped += 1;
                continue;
            }

            match validator.validate_raw(&line) {
                Ok(record) => {
                    records += 1;
                    if let Some(chunk) = accumulator.push(record) {
                        Self::hand_over(&queue, chunk)?;
                    }
                }
                Err(_) => dropped += 1,
            }
        }

        if let Some(chunk) = accumulator.finish() {
            Self::hand_over(&queue, chunk)?;
        }

        return Ok((records, dropped));
    }

    fn hand_over(queue: &Sender<Chunk>, chunk: Chunk) -> Result<(), SortError> {
        log::debug!("chunk {} sealed ({} records)", chunk.id(), chunk.len());
        queue.send(chunk).map_err(|_| SortError::WorkerPoolShutdown)
    }

    fn spill_chunk(&self, mut chunk: Chunk) -> io::Result<RunId> {
        let run = RunId::Source(chunk.id());

        chunk.sort();
        write_run(&self.run_dir, run, chunk.records(), self.config.write_buf_size)?;
        log::debug!("chunk {} saved as {}", chunk.id(), run);

        return Ok(run);
    }

    /// Merges runs into the output stream. Returns the number of records written.
    ///
    /// # Arguments
    /// * `runs` - Runs produced by [`ExternalSorter::split_sort`] or found by [`crate::run::list_runs`]
    /// * `output` - Output stream
    pub fn merge<W: Write>(&self, runs: &[RunId], output: W) -> Result<u64, SortError> {
        MergeOrchestrator::new(&self.config, &self.thread_pool, &self.run_dir).merge(runs, output)
    }

    /// Merges runs into the output file.
    pub fn merge_to_file(&self, runs: &[RunId], output: &Path) -> Result<u64, SortError> {
        let output = fs::File::create(output).map_err(SortError::OutputWriteFailure)?;
        let written = self.merge(runs, &output)?;
        output.sync_all().map_err(SortError::OutputWriteFailure)?;

        return Ok(written);
    }
}

impl Drop for ExternalSorter {
    fn drop(&mut self) {
        if let Some(tmp_dir) = self.tmp_dir.take() {
            log::debug!("removing temporary directory {}", tmp_dir.path().display());
        }
    }
}

/// Consumes the input up to and including the next separator.
fn skip_line<R: BufRead>(input: &mut R) -> io::Result<()> {
    loop {
        let available = match input.fill_buf() {
            Ok(available) => available,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if available.is_empty() {
            return Ok(());
        }

        let (found, used) = match available.iter().position(|b| *b == SEPARATOR) {
            Some(pos) => (true, pos + 1),
            None => (false, available.len()),
        };
        input.consume(used);
        if found {
            return Ok(());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
