//! `runsort` is an external merge sort for files of fixed-length line records.
//!
//! Sorting is done in two phases. During the split phase input lines are validated and collected into bounded
//! chunks which are sorted in parallel by a pool of workers and saved to disk as sorted runs. During the merge
//! phase the runs are merged by a k-way merger into a single sorted output, either all at once or in groups
//! that bound the number of simultaneously open runs. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Fixed-length records:**
//!   records are lines of exactly `record_length` bytes (32 by default) ordered byte-lexicographically. Lines of any
//!   other length are silently dropped.
//! * **Bounded memory:**
//!   chunks are limited both in bytes and in records, at most `queue_depth` sealed chunks wait for a worker,
//!   every run cursor reads at most `buffer_lines` records ahead.
//! * **Multithreading support:**
//!   chunks are sorted and saved by a thread pool, groups of runs are merged in parallel.
//! * **Bounded fan-in:**
//!   grouped merging opens at most `group_size` runs per merge.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io;
//! use std::path;
//!
//! use runsort::{ExternalSorter, ExternalSorterBuilder, MergeTopology};
//!
//! fn main() {
//!     let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
//!     let output_writer = fs::File::create("output.txt").unwrap();
//!
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_run_dir(path::Path::new("./chunks"))
//!         .with_chunk_limits(100 * 1024 * 1024, 500_000)
//!         .with_topology(MergeTopology::Grouped { group_size: 16 })
//!         .build()
//!         .unwrap();
//!
//!     let summary = sorter.split_sort(input_reader).unwrap();
//!     sorter.merge(&summary.runs, output_writer).unwrap();
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod merger;
pub mod record;
pub mod run;
pub mod sort;
pub mod topology;

pub use buffer::{Chunk, ChunkAccumulator, ChunkBuffer, ChunkLimits};
pub use config::SortConfig;
pub use merger::{Frontier, KWayMerger};
pub use record::{InvalidRecord, Record, RecordValidator};
pub use run::{list_runs, RunId, RunReadError, RunReader};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SplitSummary};
pub use topology::{MergeOrchestrator, MergeTopology};
