use depgraph::list::{MultiPackagesList, PackagesList};
use depgraph::loader::RemoteLookup;

use crate::cli::store::FileStore;

/// Arguments for `kiln list`.
#[derive(clap::Args)]
pub struct Args {
    /// Reference pattern, e.g. `zlib/*` or `boost/1.81@*`
    #[arg(value_name = "PATTERN")]
    pattern: String,

    /// Query these remotes instead of the local cache (repeatable)
    #[arg(short = 'r', long = "remote", value_name = "NAME")]
    remotes: Vec<String>,
}

pub fn run(args: Args) -> anyhow::Result<()> {
    let mut sources = Vec::new();
    if args.remotes.is_empty() {
        sources.push(super::open_cache()?);
    } else {
        sources.extend(super::open_remotes(&args.remotes)?);
    }

    let mut multi = MultiPackagesList::default();
    for source in &sources {
        let list = select(source, &args.pattern)?;
        *multi.for_source(source.source_name()) = list;
    }

    println!("{}", serde_json::to_string_pretty(&multi)?);
    Ok(())
}

/// Collects every revision and binary in one store matching the pattern.
fn select(store: &FileStore, pattern: &str) -> anyhow::Result<PackagesList> {
    let mut list = PackagesList::default();
    for ref_ in store.all_revisions() {
        if ref_.matches(pattern, false) && ref_.revision.is_some() {
            list.add_ref(ref_)?;
        }
    }
    for pref in store.all_packages() {
        if pref.ref_.matches(pattern, false) && pref.ref_.revision.is_some() {
            // Binaries whose recipe revision fell outside the selection
            // are silently skipped.
            let _ = list.add_pref(pref);
        }
    }
    Ok(list)
}
