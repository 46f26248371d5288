use super::*;
use crate::graph::GraphBuilder;
use crate::loader::{MemoryStore, RecipeInfo};

fn req(text: &str) -> Requirement {
    text.parse().unwrap()
}

fn store_with(refs: &[&str]) -> MemoryStore {
    let mut cache = MemoryStore::cache();
    for r in refs {
        cache.add(r, RecipeInfo::leaf());
    }
    cache
}

#[test]
fn captures_resolved_graph() -> anyhow::Result<()> {
    let cache = store_with(&["zlib/1.2#r1%100", "zstd/1.5#r7%200"]);
    let graph = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("zlib/[>=1.0]"), req("zstd/1.5")], vec![])?;

    let lockfile = Lockfile::create(&graph);
    assert_eq!(lockfile.version, "0.5");
    assert_eq!(lockfile.requires.len(), 2);
    assert!(lockfile.build_requires.is_empty());

    // A fresh range requirement resolves to the captured pin.
    let pinned = lockfile.resolve(&req("zlib/[>=1.0]")).unwrap();
    assert_eq!(pinned.repr_with_revision(), "zlib/1.2#r1");
    Ok(())
}

#[test]
fn pin_lists_are_isolated_by_kind() -> anyhow::Result<()> {
    let cache = store_with(&["cmake/3.25#r1%50"]);
    let graph = GraphBuilder::new(&cache, &cache)
        .expand(vec![], vec![Requirement::parse(
            "cmake/[>=3]",
            RequirementKind::Tool,
        )?])?;

    let lockfile = Lockfile::create(&graph);
    assert_eq!(lockfile.build_requires.len(), 1);
    assert!(lockfile.requires.is_empty());

    // The build pin never answers a host requirement.
    assert!(lockfile.resolve(&req("cmake/[>=3]")).is_none());
    let tool = Requirement::parse("cmake/[>=3]", RequirementKind::Tool)?;
    assert!(lockfile.resolve(&tool).is_some());
    Ok(())
}

#[test]
fn locked_graph_resolves_identically() -> anyhow::Result<()> {
    let cache = store_with(&["zlib/1.2#r1%100"]);
    let graph = GraphBuilder::new(&cache, &cache).expand(vec![req("zlib/[>=1.0]")], vec![])?;
    let lockfile = Lockfile::create(&graph);

    // A newer version appears; the locked resolution must not see it.
    let cache = store_with(&["zlib/1.2#r1%100", "zlib/1.9#r9%900"]);
    let locked = GraphBuilder::new(&cache, &cache)
        .lockfile(&lockfile, false)
        .expand(vec![req("zlib/[>=1.0]")], vec![])?;
    assert_eq!(
        locked.nodes[1].ref_.repr_with_revision(),
        "zlib/1.2#r1"
    );

    // Re-capturing the locked graph reproduces the same lockfile.
    let again = Lockfile::create(&locked);
    assert_eq!(
        serde_json::to_string(&again)?,
        serde_json::to_string(&lockfile)?
    );
    Ok(())
}

#[test]
fn merge_unions_and_orders() {
    let mut a = Lockfile::new();
    a.requires.push("zlib/1.2#r1%100".parse().unwrap());
    a.requires.push("zstd/1.5#r7%200".parse().unwrap());
    let mut b = Lockfile::new();
    b.requires.push("zlib/1.2#r1%100".parse().unwrap());
    b.requires.push("boost/1.81#r2%300".parse().unwrap());

    a.merge(&b);
    let names: Vec<String> = a.requires.iter().map(|r| r.repr()).collect();
    assert_eq!(names, ["boost/1.81", "zlib/1.2", "zstd/1.5"]);
}

#[test]
fn highest_satisfying_pin_wins() {
    let mut lockfile = Lockfile::new();
    lockfile.requires.push("zlib/1.2#r1".parse().unwrap());
    lockfile.requires.push("zlib/1.4#r3".parse().unwrap());
    lockfile.normalize();

    let pinned = lockfile.resolve(&req("zlib/[>=1.0 <2]")).unwrap();
    assert_eq!(pinned.repr_with_revision(), "zlib/1.4#r3");

    // An exact requirement still matches the exact pin.
    let pinned = lockfile.resolve(&req("zlib/1.2")).unwrap();
    assert_eq!(pinned.repr_with_revision(), "zlib/1.2#r1");
}

#[test]
fn save_load_round_trip() -> anyhow::Result<()> {
    let mut lockfile = Lockfile::new();
    lockfile.requires.push("zlib/1.2#r1%100".parse()?);
    lockfile.normalize();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("kiln.lock");
    lockfile.save(&path)?;
    let loaded = Lockfile::load(&path)?;
    assert_eq!(
        serde_json::to_string(&loaded)?,
        serde_json::to_string(&lockfile)?
    );
    Ok(())
}

#[test]
fn unknown_format_version_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("kiln.lock");
    std::fs::write(&path, r#"{"version": "9.9"}"#)?;
    assert!(matches!(
        Lockfile::load(&path),
        Err(LockfileError::UnsupportedVersion(v)) if v == "9.9"
    ));
    Ok(())
}

#[test]
fn clean_drops_unused_pins() -> anyhow::Result<()> {
    let cache = store_with(&["zlib/1.2#r1%100"]);
    let graph = GraphBuilder::new(&cache, &cache).expand(vec![req("zlib/1.2")], vec![])?;

    let mut lockfile = Lockfile::create(&graph);
    lockfile.requires.push("stale/9.9#r0".parse()?);
    lockfile.normalize();
    assert_eq!(lockfile.requires.len(), 2);

    lockfile.clean(&graph);
    let names: Vec<String> = lockfile.requires.iter().map(|r| r.repr()).collect();
    assert_eq!(names, ["zlib/1.2"]);
    Ok(())
}
