use std::sync::Arc;

use anyhow::Context as _;
use config::CONFIG;
use depgraph::list::PackagesList;
use depgraph::refs::RecipeReference;
use depgraph::transfer::{FetchFailure, TransferPool};

use crate::cli::store::FileStore;

/// Arguments for `kiln upload`.
#[derive(clap::Args)]
pub struct Args {
    /// Reference pattern selecting what to upload, e.g. `zlib/*`
    #[arg(value_name = "PATTERN")]
    pattern: String,

    /// The destination remote
    #[arg(short = 'r', long = "remote", value_name = "NAME", required = true)]
    remote: String,

    /// Print what would be uploaded without transferring anything
    #[arg(long)]
    dry_run: bool,

    /// Upload even revisions the remote already has
    #[arg(long)]
    force: bool,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    let cache = super::open_cache()?;
    let remote = super::open_remote(&args.remote)?;

    let mut selection = select_revisions(&cache, &args.pattern)?;
    if !args.force {
        let existing = select_revisions(&remote, &args.pattern)?;
        selection.keep_outer(&existing);
    }
    if selection.is_empty() {
        tracing::info!(pattern = %args.pattern, remote = %args.remote, "nothing to upload");
        return Ok(());
    }

    let refs: Vec<String> = selection.refs().map(|(key, _)| key).collect();
    if args.dry_run {
        for key in &refs {
            println!("{key}");
        }
        return Ok(());
    }

    let cache = Arc::new(cache);
    let remote = Arc::new(remote);
    let pool = TransferPool::from_config(&CONFIG.download);
    pool.run(refs.clone(), move |key| {
        let cache = Arc::clone(&cache);
        let remote = Arc::clone(&remote);
        async move { push_revision(&cache, &remote, &key) }
    })
    .await
    .context("upload failed")?;

    tracing::info!(count = refs.len(), remote = %args.remote, "upload complete");
    Ok(())
}

/// Copies one revision's manifest from the cache to the remote.
fn push_revision(cache: &FileStore, remote: &FileStore, key: &str) -> Result<(), FetchFailure> {
    let ref_: RecipeReference = key
        .parse()
        .map_err(|e| FetchFailure::Fatal(format!("`{key}`: {e}")))?;
    let text = cache
        .read_manifest(&ref_)
        .map_err(|e| FetchFailure::Fatal(e.to_string()))?;
    remote
        .write_manifest(&ref_, &text)
        .map_err(|e| FetchFailure::Transient(e.to_string()))?;
    tracing::debug!(reference = key, "revision pushed");
    Ok(())
}

/// Everything in a store matching the pattern, as a package list.
fn select_revisions(store: &FileStore, pattern: &str) -> anyhow::Result<PackagesList> {
    let mut list = PackagesList::default();
    for ref_ in store.all_revisions() {
        if ref_.matches(pattern, false) && ref_.revision.is_some() {
            list.add_ref(ref_)?;
        }
    }
    Ok(list)
}
