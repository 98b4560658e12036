//! Merge orchestration.
//!
//! Runs are merged either in a single pass over all of them or in groups. Grouped merging bounds the number of
//! simultaneously open runs by the group size: groups are merged in parallel into intermediate runs, which are
//! merged again (never concatenated, their value ranges overlap) until a single pass can produce the output.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use rayon::prelude::*;

use crate::config::SortConfig;
use crate::merger::KWayMerger;
use crate::record::{Record, SEPARATOR};
use crate::run::{RunId, RunReadError, RunReader, RunWriter};
use crate::sort::SortError;

/// Merge fan-in topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTopology {
    /// All runs are merged at once.
    Flat,
    /// Runs are merged in groups of at most `group_size` runs.
    Grouped { group_size: usize },
}

/// Merges a run set into a single sorted output.
pub struct MergeOrchestrator<'a> {
    config: &'a SortConfig,
    thread_pool: &'a rayon::ThreadPool,
    run_dir: &'a Path,
}

impl<'a> MergeOrchestrator<'a> {
    pub fn new(config: &'a SortConfig, thread_pool: &'a rayon::ThreadPool, run_dir: &'a Path) -> Self {
        MergeOrchestrator {
            config,
            thread_pool,
            run_dir,
        }
    }

    /// Merges runs into the output. Returns the number of records written.
    ///
    /// Source runs are removed once the merge succeeds unless the configuration asks to keep them.
    /// Nothing is removed on failure.
    pub fn merge<W: Write>(&self, runs: &[RunId], output: W) -> Result<u64, SortError> {
        log::info!("merging {} runs ({:?})", runs.len(), self.config.topology);

        let written = match self.config.topology {
            MergeTopology::Flat => self.merge_flat(runs, output)?,
            MergeTopology::Grouped { group_size } => self.merge_grouped(runs, group_size, output)?,
        };

        if !self.config.keep_runs {
            self.remove_runs(runs);
        }
        log::info!("merge done ({} records)", written);

        return Ok(written);
    }

    fn merge_flat<W: Write>(&self, runs: &[RunId], output: W) -> Result<u64, SortError> {
        let mut writer = io::BufWriter::with_capacity(self.config.write_buf_size, output);
        let written = self.merge_into(runs, |record| {
            writer.write_all(record.as_bytes())?;
            writer.write_all(&[SEPARATOR])
        })?;
        writer.flush().map_err(SortError::OutputWriteFailure)?;

        return Ok(written);
    }

    fn merge_grouped<W: Write>(&self, runs: &[RunId], group_size: usize, output: W) -> Result<u64, SortError> {
        let mut pending = runs.to_vec();
        let mut pass = 0;

        while pending.len() > group_size {
            let merged = self.merge_pass(&pending, group_size, pass)?;
            if pass > 0 {
                self.remove_runs(&pending);
            }
            pending = merged;
            pass += 1;
        }

        let written = self.merge_flat(&pending, output)?;
        if pass > 0 {
            self.remove_runs(&pending);
        }

        return Ok(written);
    }

    /// Merges every group of runs into an intermediate run. Groups are merged in parallel.
    fn merge_pass(&self, runs: &[RunId], group_size: usize, pass: u32) -> Result<Vec<RunId>, SortError> {
        let groups: Vec<&[RunId]> = runs.chunks(group_size).collect();
        log::info!("merge pass {}: {} runs in {} groups", pass, runs.len(), groups.len());

        self.thread_pool.install(|| {
            groups
                .par_iter()
                .enumerate()
                .map(|(group, members)| {
                    let id = RunId::Intermediate {
                        pass,
                        group: group as u32,
                    };
                    self.merge_group(members, id)
                })
                .collect()
        })
    }

    fn merge_group(&self, runs: &[RunId], id: RunId) -> Result<RunId, SortError> {
        let mut writer =
            RunWriter::create(self.run_dir, self.config.write_buf_size).map_err(SortError::OutputWriteFailure)?;
        self.merge_into(runs, |record| writer.write(record))?;
        let written = writer.written();
        writer
            .persist(&id.path(self.run_dir))
            .map_err(SortError::OutputWriteFailure)?;

        log::debug!("{} runs merged into {} ({} records)", runs.len(), id, written);

        return Ok(id);
    }

    /// Runs a k-way merge over the runs passing each record to `emit`.
    fn merge_into<S>(&self, runs: &[RunId], mut emit: S) -> Result<u64, SortError>
    where
        S: FnMut(&Record) -> io::Result<()>,
    {
        let mut written = 0;
        for record in self.open(runs)? {
            let record = record.map_err(SortError::RunReadFailure)?;
            emit(&record).map_err(SortError::OutputWriteFailure)?;
            written += 1;
        }

        return Ok(written);
    }

    fn open(&self, runs: &[RunId]) -> Result<impl Iterator<Item = Result<Record, RunReadError>>, SortError> {
        let mut readers = Vec::with_capacity(runs.len());
        for run in runs {
            let path = run.path(self.run_dir);
            let reader = RunReader::open(
                &path,
                self.config.record_length,
                self.config.buffer_lines,
                self.config.read_buf_size,
            )
            .map_err(|source| SortError::RunOpenFailure { path, source })?;
            readers.push(reader);
        }

        return Ok(KWayMerger::new(readers, Record::cmp));
    }

    fn remove_runs(&self, runs: &[RunId]) {
        for run in runs {
            let path = run.path(self.run_dir);
            if let Err(err) = fs::remove_file(&path) {
                log::warn!("run {} not removed: {}", path.display(), err);
            }
        }
    }
}
