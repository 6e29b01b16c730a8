use crate::align::{MatchParams, DEFAULT_MAX_EDITS, DEFAULT_PREFIX_CHARS};
use crate::render::RenderOptions;
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_CLIPPINGS_PATH: &str = "./My Clippings.txt";
const DEFAULT_DATABASE_PATH: &str = "./highlights.db";
const DEFAULT_EXTENSIONS: &str = "epub,mobi,azw3";

#[derive(Parser, Debug)]
#[command(name = "kindle-clippings")]
#[command(about = "Parse Kindle clippings into deduplicated per-book highlights")]
pub struct CliArgs {
    /// Path to the "My Clippings.txt" export
    #[arg(short, long)]
    pub clippings_path: Option<String>,

    /// Directory searched for book files used to find chapter headings
    #[arg(short, long)]
    pub books_path: Option<String>,

    /// Path to the SQLite database file
    #[arg(short, long)]
    pub database_path: Option<String>,

    /// Comma-separated book file extensions to search for
    #[arg(long)]
    pub extensions: Option<String>,

    /// Characters of each highlight used to locate it in the book
    #[arg(long, default_value_t = DEFAULT_PREFIX_CHARS)]
    pub prefix_chars: usize,

    /// Edits tolerated when locating a highlight in the book
    #[arg(long, default_value_t = DEFAULT_MAX_EDITS)]
    pub max_edits: usize,

    /// Worker threads used for heading alignment
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Leave page and location out of the rendered highlights
    #[arg(long)]
    pub no_location: bool,

    /// Leave the highlight date out of the rendered highlights
    #[arg(long)]
    pub no_date: bool,

    /// Parse and align without writing to the database
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub clippings_path: PathBuf,
    pub books_path: Option<PathBuf>,
    pub database_path: PathBuf,
    pub extensions: Vec<String>,
    pub matching: MatchParams,
    pub jobs: usize,
    pub render: RenderOptions,
    pub dry_run: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("--prefix-chars must be greater than zero")]
    InvalidPrefixLength,
    #[error("--jobs must be greater than zero")]
    InvalidJobs,
    #[error("No book file extensions given")]
    NoExtensions,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let cli = CliArgs::parse();
        Self::from_args(cli)
    }

    fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        if cli.prefix_chars == 0 {
            return Err(ConfigError::InvalidPrefixLength);
        }
        if cli.jobs == 0 {
            return Err(ConfigError::InvalidJobs);
        }

        let clippings_path = cli
            .clippings_path
            .or_else(|| std::env::var("CLIPPINGS_PATH").ok())
            .unwrap_or_else(|| DEFAULT_CLIPPINGS_PATH.to_string());

        let books_path = cli
            .books_path
            .or_else(|| std::env::var("BOOKS_PATH").ok())
            .filter(|p| !p.trim().is_empty());

        let database_path = cli
            .database_path
            .or_else(|| std::env::var("DATABASE_PATH").ok())
            .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());

        let extensions = parse_extensions(cli.extensions.as_deref().unwrap_or(DEFAULT_EXTENSIONS));
        if extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }

        Ok(Config {
            clippings_path: PathBuf::from(clippings_path),
            books_path: books_path.map(PathBuf::from),
            database_path: PathBuf::from(database_path),
            extensions,
            matching: MatchParams {
                prefix_chars: cli.prefix_chars,
                max_edits: cli.max_edits,
            },
            jobs: cli.jobs,
            render: RenderOptions {
                include_location: !cli.no_location,
                include_date: !cli.no_date,
            },
            dry_run: cli.dry_run,
        })
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
