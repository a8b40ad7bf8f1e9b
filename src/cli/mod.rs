//! Command-line interface for mniam
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and argument overrides
//! - Parsing JSON filters and pipelines into BSON
//! - Running a query and streaming its documents as JSON lines

use std::io::Write;
use std::path::PathBuf;

use bson::{Bson, Document};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::collection::CollectionSpec;
use crate::config::{Config, LogLevel};
use crate::database::{Database, redact_credentials};
use crate::error::{BoxError, ConfigError, MniamError, Result};

/// mniam - stream MongoDB query results as JSON lines
#[derive(Parser, Debug)]
#[command(
    name = "mniam",
    version,
    about = "Stream MongoDB query results as JSON lines",
    long_about = "Runs a find or aggregate against a collection and prints every document as
relaxed extended JSON, one per line, processing up to --concurrency documents at once."
)]
pub struct CliArgs {
    /// MongoDB connection URI
    ///
    /// Format: mongodb://[username:password@]host[:port][/database][?options]
    #[arg(value_name = "URI")]
    pub uri: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Database name to use when the URI does not name one
    #[arg(long, value_name = "NAME", global = true)]
    pub database: Option<String>,

    /// Documents fetched per round trip
    #[arg(long, value_name = "N", global = true)]
    pub batch_size: Option<u32>,

    /// Connection timeout in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (debug logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for mniam
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print documents matching a filter
    Find {
        /// Collection name
        #[arg(long)]
        collection: String,

        /// Filter as extended JSON
        #[arg(long, default_value = "{}")]
        filter: String,

        /// Projection as extended JSON
        #[arg(long)]
        projection: Option<String>,

        /// Maximum number of documents
        #[arg(long)]
        limit: Option<i64>,

        /// Documents processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Print the results of an aggregation pipeline
    Aggregate {
        /// Collection name
        #[arg(long)]
        collection: String,

        /// Pipeline as an extended JSON array of stages
        #[arg(long)]
        pipeline: String,

        /// Documents processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Create a new CLI interface
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        let args = CliArgs::parse();
        let config = Self::load_config(&args)?;

        Ok(Self { args, config })
    }

    /// Load configuration from file and environment, then apply arguments
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = Config::load(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, args);
        config.validate()?;
        Ok(config)
    }

    /// Override configuration values with CLI arguments where provided
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        if let Some(uri) = &args.uri {
            config.connection.default_uri = uri.clone();
        }
        if let Some(database) = &args.database {
            config.connection.database = Some(database.clone());
        }
        if let Some(timeout) = args.timeout {
            config.connection.timeout = timeout;
        }
        if let Some(batch_size) = args.batch_size {
            config.cursor.batch_size = batch_size;
        }

        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else {
            config.logging.level
        };
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connection URI with credentials hidden
    pub fn sanitized_uri(&self) -> String {
        redact_credentials(&self.config.connection.default_uri)
    }

    /// Run the selected subcommand
    ///
    /// # Arguments
    /// * `cancel_token` - Fired to stop streaming early
    pub async fn execute(&self, cancel_token: CancellationToken) -> Result<()> {
        match &self.args.command {
            Commands::Config { show, validate } => self.handle_config(*show, *validate),
            Commands::Find {
                collection,
                filter,
                projection,
                limit,
                concurrency,
            } => {
                let collection = self.database().collection(CollectionSpec::new(collection));
                let mut query = collection
                    .query(parse_document(filter)?)
                    .with_cancellation(cancel_token);
                if let Some(projection) = projection {
                    query = query.fields(parse_document(projection)?);
                }
                if let Some(limit) = limit {
                    query = query.limit(*limit);
                }

                match self.concurrency(*concurrency) {
                    1 => query.each_series(print_document).await,
                    limit => query.each_limit(limit, print_document).await,
                }
            }
            Commands::Aggregate {
                collection,
                pipeline,
                concurrency,
            } => {
                let collection = self.database().collection(CollectionSpec::new(collection));
                let aggregate = collection
                    .aggregate(parse_pipeline(pipeline)?)
                    .with_cancellation(cancel_token);

                match self.concurrency(*concurrency) {
                    1 => aggregate.each_series(print_document).await,
                    limit => aggregate.each_limit(limit, print_document).await,
                }
            }
        }
    }

    fn database(&self) -> Database {
        info!("Using {}", self.sanitized_uri());
        Database::new(self.config.connection.default_uri.clone(), &self.config)
    }

    fn concurrency(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.config.cursor.concurrency)
    }

    fn handle_config(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.config.validate()?;
            println!("Configuration is valid");
        }
        if show || !validate {
            print!("{}", self.config.to_toml()?);
        }
        Ok(())
    }
}

/// Parse an extended JSON object into a document
pub fn parse_document(input: &str) -> Result<Document> {
    match parse_bson(input)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(invalid_json(
            input,
            format!("expected an object, got {:?}", other.element_type()),
        )),
    }
}

/// Parse an extended JSON array of objects into pipeline stages
pub fn parse_pipeline(input: &str) -> Result<Vec<Document>> {
    let Bson::Array(stages) = parse_bson(input)? else {
        return Err(invalid_json(input, "expected an array of stages".to_string()));
    };
    stages
        .into_iter()
        .map(|stage| match stage {
            Bson::Document(doc) => Ok(doc),
            other => Err(invalid_json(
                input,
                format!("stage is not an object: {other}"),
            )),
        })
        .collect()
}

fn parse_bson(input: &str) -> Result<Bson> {
    let value: serde_json::Value =
        serde_json::from_str(input).map_err(|e| invalid_json(input, e.to_string()))?;
    Bson::try_from(value).map_err(|e| invalid_json(input, e.to_string()))
}

fn invalid_json(input: &str, reason: String) -> MniamError {
    ConfigError::InvalidValue {
        field: format!("json ({reason})"),
        value: input.to_string(),
    }
    .into()
}

/// Write one document as a relaxed extended JSON line
async fn print_document(doc: Document) -> std::result::Result<(), BoxError> {
    let line = Bson::Document(doc).into_relaxed_extjson().to_string();
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    Ok(())
}
