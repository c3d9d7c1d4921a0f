use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(name = "bmgtool", author, version, about, long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub subcommand: Commands,

    #[clap(global = true, default_value_t = 0, short = 'v', long)]
    pub verbosity: u8,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Decode a BMG file (binary or text) to a normalized dump
    #[clap(arg_required_else_help = true)]
    Decode {
        file: PathBuf,

        #[clap(short = 'o', long)]
        out: Option<PathBuf>,

        #[clap(flatten)]
        options: DecodeOptions,
    },

    /// Encode a `#BMG` text or JSON dump into the binary container format
    #[clap(arg_required_else_help = true)]
    Encode {
        file: PathBuf,

        #[clap(short = 'o', long)]
        out: Option<PathBuf>,

        #[clap(flatten)]
        options: EncodeOptions,
    },

    /// Render a binary BMG file as `#BMG` text
    #[clap(arg_required_else_help = true)]
    Text {
        file: PathBuf,

        #[clap(short = 'o', long)]
        out: Option<PathBuf>,
    },

    /// Apply a named patch operation, merging `source` into `dest`
    #[clap(arg_required_else_help = true)]
    Patch {
        dest: PathBuf,

        /// The other store most operations merge against; omit for standalone
        /// commands (FORMAT, REGEX, ID, UNICODE, RM-ESCAPES, RM-FILLED, …)
        source: Option<PathBuf>,

        #[clap(short = 'o', long)]
        out: Option<PathBuf>,

        #[clap(flatten)]
        options: PatchOptions,
    },
}

#[derive(Debug, Clone, Copy, Args)]
pub struct DecodeOptions {
    /// Dump as JSON instead of `#BMG` text
    #[clap(long, default_value_t = false)]
    pub json: bool,

    /// Out-of-range encoding bytes fall back to CP1252 with a warning instead
    /// of failing the decode
    #[clap(long, default_value_t = false)]
    pub force_encoding: bool,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct EncodeOptions {
    /// Treat the input as JSON rather than `#BMG` text
    #[clap(long, default_value_t = false)]
    pub json: bool,

    /// Write a GameCube-style legacy header (block-size-scaled `size` field,
    /// encoding byte forced to 0)
    #[clap(long, default_value_t = false)]
    pub legacy: bool,
}

#[derive(Debug, Clone, Args)]
pub struct PatchOptions {
    /// Named patch command: REPLACE, INSERT, OVERWRITE, DELETE, MASK, EQUAL,
    /// NOT-EQUAL, PRINT, FORMAT, REGEX, RM-REGEX, ID, ID-ALL, UNICODE,
    /// RM-ESCAPES, X-COPY, X-FORCE-COPY, CT-COPY, CT-FORCE-COPY, CT-FILL,
    /// LE-COPY, LE-FORCE-COPY, LE-FILL, RM-FILLED
    #[clap(long = "cmd")]
    pub command: String,

    /// Argument for FORMAT's template, REGEX/RM-REGEX's pipeline, or the
    /// small,medium,large MID triple for GENERIC (comma-separated hex)
    #[clap(long)]
    pub arg: Option<String>,

    /// CT-FILL/LE-FILL: cap on synthesised placeholders per range (0 = unlimited)
    #[clap(long, default_value_t = 0)]
    pub fill_limit: u32,
}
