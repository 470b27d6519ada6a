use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use finrag::RagConfig;
use finrag_telemetry::LogFormat;

/// Ask questions about a folder of financial documents.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the persisted index
    #[arg(long, global = true, env = "FINRAG_INDEX_DIR", default_value = "finrag_index")]
    pub index_dir: PathBuf,

    /// Log output format (pretty or json)
    #[arg(long, global = true, env = "FINRAG_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Embedding model used for chunks and questions
    #[arg(
        long,
        global = true,
        env = "FINRAG_EMBEDDER",
        value_enum,
        default_value_t = EmbedderKind::Hashing
    )]
    pub embedder: EmbedderKind,

    /// Maximum chunk size in characters
    #[arg(long, global = true, env = "FINRAG_CHUNK_SIZE")]
    pub chunk_size: Option<usize>,

    /// Characters shared by consecutive chunks
    #[arg(long, global = true, env = "FINRAG_CHUNK_OVERLAP")]
    pub chunk_overlap: Option<usize>,

    /// Largest accepted document in bytes
    #[arg(long, global = true, env = "FINRAG_MAX_DOCUMENT_BYTES")]
    pub max_document_bytes: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which embedding provider backs the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Feature hashing, no model download
    Hashing,
    /// all-MiniLM-L6-v2 through fastembed (needs the `fastembed` feature)
    Minilm,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract, chunk, and index PDF or DOCX files
    Ingest {
        /// Files to ingest; each file name becomes its document id
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Answer a question from the indexed documents
    Query {
        /// The question to answer
        question: String,

        /// Number of passages to retrieve
        #[arg(long, env = "FINRAG_TOP_K")]
        top_k: Option<usize>,

        /// Minimum cosine similarity for a passage to count as relevant
        #[arg(long, env = "FINRAG_SIMILARITY_THRESHOLD")]
        threshold: Option<f32>,
    },
    /// Show index statistics
    Stats,
    /// Remove every document from the index
    Reset,
    /// Check whether the configured language model backend answers
    Health,
}

impl Cli {
    /// Build the pipeline configuration from defaults and flag overrides.
    pub fn rag_config(&self) -> finrag::Result<RagConfig> {
        let defaults = RagConfig::default();
        let mut builder = RagConfig::builder()
            .chunk_size(self.chunk_size.unwrap_or(defaults.chunk_size))
            .chunk_overlap(self.chunk_overlap.unwrap_or(defaults.chunk_overlap))
            .max_document_bytes(self.max_document_bytes.unwrap_or(defaults.max_document_bytes));
        if let Commands::Query { top_k, threshold, .. } = &self.command {
            if let Some(k) = top_k {
                builder = builder.top_k(*k);
            }
            if let Some(t) = threshold {
                builder = builder.similarity_threshold(*t);
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn query_overrides_flow_into_the_config() {
        let cli = Cli::try_parse_from([
            "finrag",
            "--chunk-size",
            "200",
            "--chunk-overlap",
            "50",
            "query",
            "What is the payment term?",
            "--top-k",
            "2",
            "--threshold",
            "0.4",
        ])
        .unwrap();
        let config = cli.rag_config().unwrap();
        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.top_k, 2);
        assert!((config.similarity_threshold - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_geometry_is_a_config_error() {
        let cli =
            Cli::try_parse_from(["finrag", "--chunk-size", "10", "--chunk-overlap", "10", "stats"])
                .unwrap();
        assert_eq!(cli.rag_config().unwrap_err().kind(), finrag::ErrorKind::ConfigError);
    }

    #[test]
    fn ingest_requires_files() {
        assert!(Cli::try_parse_from(["finrag", "ingest"]).is_err());
        let cli = Cli::try_parse_from(["finrag", "--log-format", "json", "ingest", "a.pdf"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn embedder_defaults_to_hashing() {
        let cli = Cli::try_parse_from(["finrag", "stats"]).unwrap();
        assert_eq!(cli.embedder, EmbedderKind::Hashing);

        let cli = Cli::try_parse_from(["finrag", "query", "q", "--embedder", "minilm"]).unwrap();
        assert_eq!(cli.embedder, EmbedderKind::Minilm);

        assert!(Cli::try_parse_from(["finrag", "--embedder", "bert", "stats"]).is_err());
    }
}
