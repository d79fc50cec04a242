//! Command line and run configuration.
//!
//! [`Cli`] is the clap definition of the `msgsplit` binary. It resolves into a
//! [`Job`]: the run configuration the library functions take plus where the
//! outputs go.

use crate::io::compression::Compression;
use crate::io::sink::{COLUMN_SUFFIX, DirSinks, SHARD_SUFFIX};
use crate::shard::Prefix;
use clap::{ArgAction, Parser, Subcommand};
use std::io;
use std::path::PathBuf;

/// Default number of records between progress log lines.
pub const DEFAULT_PROGRESS_EVERY: u64 = 10_000;

/// Default shard key.
pub const DEFAULT_SHARD_KEY: &str = "distinct_id";

#[derive(Debug, Parser)]
#[command(name = "msgsplit", version, about = "Transpose or shard a stream of MessagePack maps", long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv). Ignored when RUST_LOG is set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors. Overrides -v.
    #[arg(short = 'q', long, action = ArgAction::SetTrue, global = true)]
    pub quiet: bool,

    /// Input file or glob pattern; stdin when omitted or "-".
    #[arg(value_name = "PATH", short, long, global = true)]
    pub input: Option<String>,

    /// Write run metrics as JSON to this file.
    #[arg(value_name = "PATH", long, global = true)]
    pub metrics: Option<PathBuf>,

    /// Log progress every N records (0 disables).
    #[arg(value_name = "N", long, default_value_t = DEFAULT_PROGRESS_EVERY, global = true)]
    pub progress_every: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Transpose dictionaries into one file per key
    #[command(visible_alias = "t")]
    Transpose {
        /// Directory receiving <key>.col.msg files.
        #[arg(value_name = "DIR", short, long, default_value = "d")]
        out_dir: PathBuf,

        /// Compress every output file.
        #[arg(value_name = "CODEC", short, long, value_enum, default_value_t = Compression::None)]
        compress: Compression,
    },
    /// Shard dictionaries by the value of one key
    #[command(visible_alias = "s")]
    Shard {
        /// Variable to shard over.
        #[arg(value_name = "NAME", short, long, default_value = DEFAULT_SHARD_KEY)]
        key: String,

        /// Number of bytes on the left of the value to use as the shard
        /// name (-1 means 'all').
        #[arg(
            value_name = "N",
            short,
            long,
            default_value = "4",
            allow_negative_numbers = true
        )]
        nbyte: Prefix,

        /// Directory receiving <id>.shard.msg files.
        #[arg(value_name = "DIR", short, long, default_value = "s")]
        out_dir: PathBuf,

        /// Compress every output file.
        #[arg(value_name = "CODEC", short, long, value_enum, default_value_t = Compression::None)]
        compress: Compression,
    },
}

/// Where and how outputs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub compression: Compression,
}

impl OutputConfig {
    /// Sink factory for this output, creating the directory.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn sinks(&self, suffix: &'static str) -> io::Result<DirSinks> {
        DirSinks::new(&self.dir, suffix, self.compression)
    }
}

/// Settings of a transpose run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransposeConfig {
    pub progress_every: u64,
}

impl Default for TransposeConfig {
    fn default() -> Self {
        Self {
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// Settings of a shard run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardConfig {
    /// Field whose value selects the shard.
    pub key: String,
    pub prefix: Prefix,
    pub progress_every: u64,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_SHARD_KEY.to_string(),
            prefix: Prefix::default(),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// A fully resolved invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Transpose(TransposeConfig, OutputConfig),
    Shard(ShardConfig, OutputConfig),
}

impl Job {
    #[must_use]
    pub fn output(&self) -> &OutputConfig {
        match self {
            Self::Transpose(_, output) | Self::Shard(_, output) => output,
        }
    }

    /// File suffix of this job's outputs.
    #[must_use]
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Transpose(..) => COLUMN_SUFFIX,
            Self::Shard(..) => SHARD_SUFFIX,
        }
    }
}

impl Cli {
    /// Split the parsed command line into the job to run.
    #[must_use]
    pub fn job(&self) -> Job {
        match &self.command {
            Command::Transpose { out_dir, compress } => Job::Transpose(
                TransposeConfig {
                    progress_every: self.progress_every,
                },
                OutputConfig {
                    dir: out_dir.clone(),
                    compression: *compress,
                },
            ),
            Command::Shard {
                key,
                nbyte,
                out_dir,
                compress,
            } => Job::Shard(
                ShardConfig {
                    key: key.clone(),
                    prefix: *nbyte,
                    progress_every: self.progress_every,
                },
                OutputConfig {
                    dir: out_dir.clone(),
                    compression: *compress,
                },
            ),
        }
    }
}
