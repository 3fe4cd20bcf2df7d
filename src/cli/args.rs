//! CLI argument definitions using clap.
//!
//! ## Commands
//!
//! - `get`: evaluate one path against a schema document
//! - `set`: write a value into a schema document
//! - `keys`: list the logical keys of an object
//! - `check`: validate expression keys and variant declarations
//! - `init`: initialize a `.weftrc.json` configuration file

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};

use crate::core::variant::VariantContext;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Arguments {
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Arguments {
    /// Get the verbose flag from the command's common args.
    pub fn verbose(&self) -> bool {
        match &self.command {
            Some(Command::Get(cmd)) => cmd.common.verbose,
            Some(Command::Set(cmd)) => cmd.common.verbose,
            Some(Command::Keys(cmd)) => cmd.common.verbose,
            Some(Command::Check(cmd)) => cmd.common.verbose,
            Some(Command::Init) | None => false,
        }
    }
}

/// Common arguments shared by all document commands.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Schema document to operate on
    #[arg(short = 'f', long, env = "WEFT_FILE", default_value = "weft.json")]
    pub file: PathBuf,

    /// Variant context entry; can be given multiple times: --context lang=es
    #[arg(long = "context", value_name = "DIM=VALUE")]
    pub context: Vec<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl CommonArgs {
    pub fn variant_context(&self) -> Result<VariantContext> {
        let mut context = VariantContext::new();
        for entry in &self.context {
            match entry.split_once('=') {
                Some((dimension, value)) if !dimension.is_empty() => {
                    context.set(dimension, value);
                }
                _ => bail!("invalid context entry '{entry}', expected DIM=VALUE"),
            }
        }
        Ok(context)
    }
}

#[derive(Debug, Args)]
pub struct GetCommand {
    /// Dotted path to read
    pub path: String,

    /// Bypass and rewrite the cache for this read
    #[arg(long)]
    pub fresh: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct SetCommand {
    /// Dotted path to write
    pub path: String,

    /// Value to write; parsed as JSON, or taken as a string when it is not
    pub value: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct KeysCommand {
    /// Dotted path of the object to list; the root when omitted
    pub path: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct CheckCommand {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Evaluate one path and print the result
    Get(GetCommand),
    /// Write a value and rewrite the document file
    Set(SetCommand),
    /// List the logical keys of an object
    Keys(KeysCommand),
    /// Validate expression keys and variant declarations
    Check(CheckCommand),
    /// Initialize a new .weftrc.json configuration file
    Init,
}
