use std::fs;
use std::io;
use std::path;
use std::process;
use std::time;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use runsort::{ExternalSorterBuilder, MergeTopology, SortConfig};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");
    let run_dir: Option<&str> = arg_parser.value_of("run_dir");

    let topology: Topology = arg_parser.value_of_t_or_exit("topology");
    let group_size: usize = arg_parser.value_of_t_or_exit("group_size");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let config = SortConfig {
        record_length: arg_parser.value_of_t_or_exit("record_length"),
        max_chunk_bytes: parse_size(&arg_parser, "chunk_size"),
        max_chunk_records: arg_parser.value_of_t_or_exit("chunk_records"),
        buffer_lines: arg_parser.value_of_t_or_exit("buffer_lines"),
        read_buf_size: parse_size(&arg_parser, "read_buffer") as usize,
        write_buf_size: parse_size(&arg_parser, "write_buffer") as usize,
        queue_depth: arg_parser.value_of_t_or_exit("queue_depth"),
        threads,
        topology: match topology {
            Topology::Flat => MergeTopology::Flat,
            Topology::Grouped => MergeTopology::Grouped { group_size },
        },
        keep_runs: arg_parser.is_present("keep_runs"),
    };

    let mut sorter_builder = ExternalSorterBuilder::new().with_config(config);
    if let Some(run_dir) = run_dir {
        if let Err(err) = fs::create_dir_all(run_dir) {
            log::error!("run directory creation error: {}", err);
            process::exit(1);
        }
        sorter_builder = sorter_builder.with_run_dir(path::Path::new(run_dir));
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let started = time::Instant::now();

    let input_stream = match fs::File::open(input) {
        Ok(file) => io::BufReader::with_capacity(sorter.config().read_buf_size, file),
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let summary = match sorter.split_sort(input_stream) {
        Ok(summary) => summary,
        Err(err) => {
            log::error!("data splitting error: {}", err);
            process::exit(1);
        }
    };
    log::info!("split done in {:?}", started.elapsed());

    let written = match sorter.merge_to_file(&summary.runs, path::Path::new(output)) {
        Ok(written) => written,
        Err(err) => {
            log::error!("data merging error: {}", err);
            process::exit(1);
        }
    };
    log::info!("{} records sorted in {:?}", written, started.elapsed());
}

fn parse_size(arg_parser: &clap::ArgMatches, name: &str) -> u64 {
    arg_parser
        .value_of(name)
        .expect("value has a default")
        .parse::<ByteSize>()
        .expect("value is pre-validated")
        .as_u64()
}

fn validate_size(value: &str) -> Result<(), String> {
    match value.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Topology {
    Flat,
    Grouped,
}

impl Topology {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Topology::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Topology as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("runsort")
        .about("external merge sort of fixed-length line records")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("run_dir")
                .short('d')
                .long("run-dir")
                .help("directory to store sorted runs in, a temporary one is used if omitted")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("chunk size limit")
                .takes_value(true)
                .default_value("100MiB")
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("chunk_records")
                .long("chunk-records")
                .help("chunk records limit")
                .takes_value(true)
                .default_value("500000"),
        )
        .arg(
            clap::Arg::new("record_length")
                .long("record-length")
                .help("record length in bytes, lines of other length are dropped")
                .takes_value(true)
                .default_value("32"),
        )
        .arg(
            clap::Arg::new("buffer_lines")
                .long("buffer-lines")
                .help("number of records read ahead from every run while merging")
                .takes_value(true)
                .default_value("9000"),
        )
        .arg(
            clap::Arg::new("topology")
                .long("topology")
                .help("merge topology")
                .takes_value(true)
                .default_value("grouped")
                .possible_values(Topology::possible_values()),
        )
        .arg(
            clap::Arg::new("group_size")
                .short('g')
                .long("group-size")
                .help("maximum number of runs merged at once by the grouped topology")
                .takes_value(true)
                .default_value("16"),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("queue_depth")
                .long("queue-depth")
                .help("number of chunks allowed to wait for a sorting thread")
                .takes_value(true)
                .default_value("8"),
        )
        .arg(
            clap::Arg::new("read_buffer")
                .long("read-buffer")
                .help("run file read buffer size")
                .takes_value(true)
                .default_value("512KiB")
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("write_buffer")
                .long("write-buffer")
                .help("run and result file write buffer size")
                .takes_value(true)
                .default_value("16MiB")
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("keep_runs")
                .long("keep-runs")
                .help("keep sorted runs after merging"),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
