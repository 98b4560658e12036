//! Sorter configuration.

use crate::buffer::ChunkLimits;
use crate::record::DEFAULT_RECORD_LENGTH;
use crate::topology::MergeTopology;

pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_CHUNK_RECORDS: usize = 500_000;
pub const DEFAULT_BUFFER_LINES: usize = 9000;
pub const DEFAULT_READ_BUF_SIZE: usize = 512 * 1024;
pub const DEFAULT_WRITE_BUF_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_QUEUE_DEPTH: usize = 8;
pub const DEFAULT_GROUP_SIZE: usize = 16;

/// Sorting parameters shared by the split and the merge phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortConfig {
    /// Record length in bytes. Input lines of any other length are dropped.
    pub record_length: usize,
    /// Chunk size limit in bytes, each record counted with its separator.
    pub max_chunk_bytes: u64,
    /// Chunk size limit in records.
    pub max_chunk_records: usize,
    /// Number of records each run cursor reads ahead.
    pub buffer_lines: usize,
    /// Run file read buffer size.
    pub read_buf_size: usize,
    /// Run and output file write buffer size.
    pub write_buf_size: usize,
    /// Number of sealed chunks that may wait for a sorting worker.
    pub queue_depth: usize,
    /// Number of sorting workers. If [`None`] it is selected based on available CPU core number.
    pub threads: Option<usize>,
    /// Merge fan-in topology.
    pub topology: MergeTopology,
    /// Keeps source runs on disk after a successful merge.
    pub keep_runs: bool,
}

impl SortConfig {
    pub fn chunk_limits(&self) -> ChunkLimits {
        ChunkLimits::new(self.max_chunk_bytes, self.max_chunk_records)
    }

    /// Checks parameters consistency. Returns a description of the first invalid parameter.
    pub fn validate(&self) -> Result<(), String> {
        if self.record_length == 0 {
            return Err("record length must be positive".into());
        }
        if self.max_chunk_bytes == 0 || self.max_chunk_records == 0 {
            return Err("chunk limits must be positive".into());
        }
        if self.buffer_lines == 0 {
            return Err("merge buffer lines must be positive".into());
        }
        if self.read_buf_size == 0 || self.write_buf_size == 0 {
            return Err("I/O buffer sizes must be positive".into());
        }
        if self.queue_depth == 0 {
            return Err("queue depth must be positive".into());
        }
        if let MergeTopology::Grouped { group_size } = self.topology {
            if group_size < 2 {
                return Err(format!("group size must be at least 2, got {}", group_size));
            }
        }

        return Ok(());
    }
}

impl Default for SortConfig {
    fn default() -> Self {
        SortConfig {
            record_length: DEFAULT_RECORD_LENGTH,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            max_chunk_records: DEFAULT_MAX_CHUNK_RECORDS,
            buffer_lines: DEFAULT_BUFFER_LINES,
            read_buf_size: DEFAULT_READ_BUF_SIZE,
            write_buf_size: DEFAULT_WRITE_BUF_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            threads: None,
            topology: MergeTopology::Grouped {
                group_size: DEFAULT_GROUP_SIZE,
            },
            keep_runs: false,
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::SortConfig;
    use crate::topology::MergeTopology;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(SortConfig::default().validate(), Ok(()));
    }

    #[rstest]
    #[case(SortConfig { record_length: 0, ..SortConfig::default() })]
    #[case(SortConfig { max_chunk_records: 0, ..SortConfig::default() })]
    #[case(SortConfig { max_chunk_bytes: 0, ..SortConfig::default() })]
    #[case(SortConfig { buffer_lines: 0, ..SortConfig::default() })]
    #[case(SortConfig { queue_depth: 0, ..SortConfig::default() })]
    #[case(SortConfig { topology: MergeTopology::Grouped { group_size: 1 }, ..SortConfig::default() })]
    fn test_invalid_config(#[case] config: SortConfig) {
        assert!(config.validate().is_err());
    }
}
