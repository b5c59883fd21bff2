//! Memory command - Index files into or search the shared memory store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bus_core::{services, MemoryBackend};
use bus_memory::{MemoryDocument, MemoryStore, SearchQuery};
use bus_worker::build_container;
use clap::{Args, Subcommand};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::{load_settings, CliError};

const DEFAULT_EXTENSIONS: &str = "md,txt,rst,json,yaml,yml,toml";
const MAX_FILE_BYTES: u64 = 256 * 1024;

#[derive(Args)]
pub struct MemoryArgs {
    #[command(subcommand)]
    command: MemoryCommands,
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Index text files below a directory
    Index {
        /// Directory to walk
        dir: PathBuf,

        /// File extensions to index, comma separated
        #[arg(long, default_value = DEFAULT_EXTENSIONS)]
        extensions: String,
    },

    /// Search the memory store
    Search {
        /// Free-text query
        query: String,

        /// Number of hits to show
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },
}

pub async fn execute(config: Option<PathBuf>, args: MemoryArgs) -> Result<()> {
    let settings = load_settings(config.as_deref())?;
    if settings.memory.backend == MemoryBackend::InMemory {
        warn!("Memory backend is in-memory; indexed documents are lost when this command exits");
    }

    let container = build_container(settings);
    let store = container
        .resolve::<Arc<dyn MemoryStore>>(services::MEMORY)
        .await
        .context("Failed to open memory store")?;

    match args.command {
        MemoryCommands::Index { dir, extensions } => index(store.as_ref(), &dir, &extensions).await,
        MemoryCommands::Search { query, top_k } => search(store.as_ref(), &query, top_k).await,
    }
}

async fn index(store: &dyn MemoryStore, dir: &Path, extensions: &str) -> Result<()> {
    if !dir.is_dir() {
        return Err(CliError::InvalidArgument(format!("not a directory: {}", dir.display())).into());
    }
    let extensions: Vec<String> = extensions
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    let documents = collect_documents(dir, &extensions)?;
    if documents.is_empty() {
        println!("No matching files under {}", dir.display());
        return Ok(());
    }

    let ids = store.add_batch(documents).await?;
    info!("Indexed {} documents into {}", ids.len(), store.backend());
    println!("Indexed {} files from {}", ids.len(), dir.display());
    Ok(())
}

/// One document per readable text file, keyed by its path relative to `dir`.
fn collect_documents(dir: &Path, extensions: &[String]) -> Result<Vec<MemoryDocument>> {
    let mut documents = Vec::new();
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() || !has_extension(entry.path(), extensions) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            debug!("Skipping large or unreadable file {}", entry.path().display());
            continue;
        }
        let content = match std::fs::read_to_string(entry.path()) {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => continue,
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        documents.push(
            MemoryDocument::new(content)
                .with_id(format!("file:{}", relative))
                .with_metadata("path", relative)
                .with_metadata("kind", "file"),
        );
    }
    Ok(documents)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.') || name == "target" || name == "node_modules")
        .unwrap_or(false)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

async fn search(store: &dyn MemoryStore, query: &str, top_k: usize) -> Result<()> {
    let hits = store
        .search(&SearchQuery::new(query).with_top_k(top_k.max(1)))
        .await?;
    if hits.is_empty() {
        println!("No matches for '{}'", query);
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let preview = hit
            .document
            .content
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .chars()
            .take(100)
            .collect::<String>();
        println!(
            "{:>2}. {:.3}  {}  [{}]",
            rank + 1,
            hit.score,
            hit.document.id,
            hit.source
        );
        println!("    {}", preview.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_memory::InMemoryTfIdfStore;

    fn extensions() -> Vec<String> {
        vec!["md".to_string(), "txt".to_string()]
    }

    #[test]
    fn test_collect_documents_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), "# Offline sync\nLists sync later").unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("empty.txt"), "   ").unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/guide.txt"), "Reminders fire on time").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/notes.md"), "hidden").unwrap();

        let mut ids: Vec<String> = collect_documents(dir.path(), &extensions())
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["file:docs/guide.txt", "file:readme.md"]);
    }

    #[tokio::test]
    async fn test_index_then_search() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sync.md"), "Offline sync keeps shared lists consistent").unwrap();
        std::fs::write(dir.path().join("auth.md"), "Login uses passwordless email links").unwrap();

        let store = InMemoryTfIdfStore::new();
        index(&store, dir.path(), "md").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let hits = store
            .search(&SearchQuery::new("offline sync").with_top_k(1))
            .await
            .unwrap();
        assert_eq!(hits[0].document.id, "file:sync.md");
        assert_eq!(hits[0].document.metadata["path"], "sync.md");
    }

    #[tokio::test]
    async fn test_index_rejects_missing_dir() {
        let store = InMemoryTfIdfStore::new();
        let err = index(&store, Path::new("/definitely/not/here"), "md")
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());
    }
}
