use std::path::PathBuf;

use anyhow::Context as _;
use clap::Subcommand;
use depgraph::lock::Lockfile;

use super::CommonArgs;

/// Arguments for `kiln lock`.
#[derive(clap::Args)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a graph and capture its pins into a lockfile.
    Create {
        #[command(flatten)]
        common: CommonArgs,

        /// Where to write the lockfile
        #[arg(long, value_name = "PATH", default_value = "kiln.lock")]
        lockfile_out: PathBuf,
    },
    /// Merge several lockfiles into one multi-configuration lockfile.
    Merge {
        /// The lockfiles to merge, oldest first
        #[arg(required = true, value_name = "PATH")]
        lockfiles: Vec<PathBuf>,

        /// Where to write the merged lockfile
        #[arg(long, value_name = "PATH", default_value = "kiln.lock")]
        lockfile_out: PathBuf,
    },
    /// Drop pins a fresh resolution no longer uses.
    Clean {
        #[command(flatten)]
        common: CommonArgs,

        /// The lockfile to clean (also receives the result)
        #[arg(long, value_name = "PATH", default_value = "kiln.lock")]
        lockfile_out: PathBuf,
    },
}

pub fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Create {
            common,
            lockfile_out,
        } => {
            let cache = super::open_cache()?;
            let remotes = super::open_remotes(&common.remotes)?;
            let graph = super::resolve_graph(&cache, &remotes, &common)?;
            let lockfile = Lockfile::create(&graph);
            lockfile.save(&lockfile_out).with_context(|| {
                format!("could not write lockfile `{}`", lockfile_out.display())
            })?;
            tracing::info!(
                path = %lockfile_out.display(),
                requires = lockfile.requires.len(),
                build_requires = lockfile.build_requires.len(),
                "lockfile created"
            );
            Ok(())
        },
        Command::Merge {
            lockfiles,
            lockfile_out,
        } => {
            let mut merged = Lockfile::new();
            for path in &lockfiles {
                let loaded = Lockfile::load(path)
                    .with_context(|| format!("could not load `{}`", path.display()))?;
                merged.merge(&loaded);
            }
            merged.save(&lockfile_out).with_context(|| {
                format!("could not write lockfile `{}`", lockfile_out.display())
            })?;
            tracing::info!(path = %lockfile_out.display(), inputs = lockfiles.len(), "lockfiles merged");
            Ok(())
        },
        Command::Clean {
            mut common,
            lockfile_out,
        } => {
            // Clean resolves with the lockfile applied, then drops the
            // pins that resolution did not touch.
            common.lockfile = Some(lockfile_out.clone());
            common.lockfile_partial = true;
            let cache = super::open_cache()?;
            let remotes = super::open_remotes(&common.remotes)?;
            let graph = super::resolve_graph(&cache, &remotes, &common)?;
            let mut lockfile = Lockfile::load(&lockfile_out)
                .with_context(|| format!("could not load `{}`", lockfile_out.display()))?;
            lockfile.clean(&graph);
            lockfile.save(&lockfile_out).with_context(|| {
                format!("could not write lockfile `{}`", lockfile_out.display())
            })?;
            tracing::info!(path = %lockfile_out.display(), "lockfile cleaned");
            Ok(())
        },
    }
}
