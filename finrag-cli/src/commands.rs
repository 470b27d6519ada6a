use std::path::{Path, PathBuf};
use std::sync::Arc;

use finrag::vectorstore::VectorIndex;
use finrag::{
    Answer, DeploymentConfig, EmbeddingProvider, HashingEmbedder, IndexManifest, IndexStore,
    InferenceClient, QueryRequest, RagConfig, RagError, RagService,
};
use tracing::{info, warn};

use crate::cli::EmbedderKind;

/// Everything a command needs besides the opened index.
pub struct Context {
    pub index_dir: PathBuf,
    pub config: RagConfig,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl Context {
    /// The manifest an index built by the selected embedder carries.
    pub fn manifest(&self) -> IndexManifest {
        IndexManifest::new(self.embedder.model_id(), self.embedder.dimensions())
    }

    fn service(&self, index: Arc<dyn VectorIndex>) -> finrag::Result<RagService> {
        let deployment = DeploymentConfig::from_env()?;
        info!(backend = deployment.target.backend_name(), model = %deployment.model, "inference configured");
        RagService::builder()
            .config(self.config.clone())
            .embedding_provider(Arc::clone(&self.embedder))
            .vector_index(index)
            .inference_client(Arc::new(InferenceClient::new(deployment)?))
            .build()
    }
}

/// Construct the embedding provider selected on the command line.
pub async fn build_embedder(kind: EmbedderKind) -> finrag::Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match kind {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::new()),
        #[cfg(feature = "fastembed")]
        EmbedderKind::Minilm => Arc::new(finrag::FastEmbedProvider::new().await?),
        #[cfg(not(feature = "fastembed"))]
        EmbedderKind::Minilm => {
            return Err(RagError::ConfigError(
                "the minilm embedder needs finrag built with the fastembed feature".to_string(),
            ));
        }
    };
    info!(model = embedder.model_id(), dimensions = embedder.dimensions(), "embedder selected");
    Ok(embedder)
}

/// Ingest every file, reporting each outcome. Fails if any file failed.
pub async fn ingest(ctx: &Context, files: &[PathBuf]) -> anyhow::Result<()> {
    let failures = IndexStore::with_index(&ctx.index_dir, ctx.manifest(), |index| async move {
        let service = ctx.service(index)?;
        let mut failures = 0usize;
        for path in files {
            match ingest_file(&service, path).await {
                Ok(chunks) => println!("ingested {} ({chunks} chunks)", path.display()),
                Err(e) => {
                    failures += 1;
                    warn!(path = %path.display(), error = %e, "ingestion failed");
                    eprintln!("failed {}: {}", path.display(), e.user_message());
                }
            }
        }
        Ok(failures)
    })
    .await?;

    if failures > 0 {
        anyhow::bail!("{failures} of {} file(s) could not be ingested", files.len());
    }
    Ok(())
}

async fn ingest_file(service: &RagService, path: &Path) -> finrag::Result<usize> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string());
    let bytes = tokio::fs::read(path).await?;
    let report = service.ingest_bytes(&name, bytes, extension, Some(&name)).await?;
    Ok(report.chunk_count)
}

/// Answer `question` and print the answer with its sources.
pub async fn query(ctx: &Context, question: String) -> finrag::Result<()> {
    let answer = IndexStore::with_shared_index(&ctx.index_dir, ctx.manifest(), |index| async move {
        ctx.service(index)?.query(QueryRequest::new(question)).await
    })
    .await?;
    print_answer(&answer);
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if answer.sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for source in &answer.sources {
        println!("  - {source}");
    }
    println!("Confidence: {:.2}", answer.confidence);
}

pub async fn stats(ctx: &Context) -> finrag::Result<()> {
    let stats = IndexStore::with_shared_index(&ctx.index_dir, ctx.manifest(), |index| async move {
        Ok(index.stats().await)
    })
    .await?;
    println!("index:      {}", ctx.index_dir.display());
    println!("model:      {} ({} dimensions)", stats.model_id, stats.dimensions);
    println!("documents:  {}", stats.document_count);
    println!("chunks:     {}", stats.entry_count);
    Ok(())
}

pub async fn reset(ctx: &Context) -> finrag::Result<()> {
    IndexStore::with_index(&ctx.index_dir, ctx.manifest(), |index| async move {
        index.reset().await
    })
    .await?;
    println!("index cleared");
    Ok(())
}

/// Check the configured backend. Reports unavailability as an error.
pub async fn health() -> finrag::Result<()> {
    let deployment = DeploymentConfig::from_env()?;
    let backend = deployment.target.backend_name();
    let client = InferenceClient::new(deployment)?;
    if client.health_check().await {
        println!("{backend}: reachable");
        Ok(())
    } else {
        println!("{backend}: unreachable");
        Err(RagError::InferenceUnavailable {
            backend: backend.to_string(),
            attempts: 1,
            message: "health check failed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finrag::{HASHING_DIMENSIONS, HASHING_MODEL_ID};

    #[tokio::test]
    async fn manifest_follows_the_selected_embedder() {
        let embedder = build_embedder(EmbedderKind::Hashing).await.unwrap();
        let ctx = Context {
            index_dir: PathBuf::from("unused"),
            config: RagConfig::default(),
            embedder,
        };
        let manifest = ctx.manifest();
        assert_eq!(manifest.model_id, HASHING_MODEL_ID);
        assert_eq!(manifest.dimensions, HASHING_DIMENSIONS);
    }

    #[cfg(not(feature = "fastembed"))]
    #[tokio::test]
    async fn minilm_without_the_feature_is_a_config_error() {
        let err = build_embedder(EmbedderKind::Minilm).await.err().unwrap();
        assert!(matches!(err, RagError::ConfigError(_)));
    }
}
