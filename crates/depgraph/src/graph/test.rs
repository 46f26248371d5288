use super::*;
use crate::loader::{MemoryStore, RecipeInfo};
use crate::lock::Lockfile;
use crate::require::RequirementKind;

fn req(text: &str) -> Requirement {
    text.parse().unwrap()
}

fn tool(text: &str) -> Requirement {
    Requirement::parse(text, RequirementKind::Tool).unwrap()
}

fn requiring(deps: &[&str]) -> RecipeInfo {
    RecipeInfo {
        requires: deps.iter().map(|d| req(d)).collect(),
        ..RecipeInfo::leaf()
    }
}

#[test]
fn diamond_shares_one_node() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.2#r1%10", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%20", requiring(&["zlib/1.2"]));
    cache.add("libb/1.0#r1%30", requiring(&["zlib/1.2"]));

    let graph = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("liba/1.0"), req("libb/1.0")], vec![])?;

    assert!(!graph.has_errors());
    // Root + liba + libb + one shared zlib.
    assert_eq!(graph.nodes.len(), 4);
    let (zlib_idx, _) = graph.find("zlib", Context::Host).unwrap();
    let parents: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.dependencies().any(|d| d == zlib_idx))
        .map(|n| n.ref_.name.as_str())
        .collect();
    assert_eq!(parents, ["liba", "libb"]);
    Ok(())
}

#[test]
fn first_seen_resolution_wins_later_tiebreaks() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.5#r1%10", RecipeInfo::leaf());
    cache.add("zlib/2.0#r1%20", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%30", requiring(&["zlib/[>=1.0 <2]"]));
    cache.add("libb/1.0#r1%40", requiring(&["zlib/[>=1.0]"]));

    let graph = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("liba/1.0"), req("libb/1.0")], vec![])?;

    // libb alone would pick 2.0, but liba resolved first and 1.5
    // satisfies both; the early winner stays.
    let zlib: Vec<&Node> = graph
        .nodes
        .iter()
        .filter(|n| n.ref_.name == "zlib")
        .collect();
    assert_eq!(zlib.len(), 1);
    assert_eq!(zlib[0].ref_.version.as_str(), "1.5");
    Ok(())
}

#[test]
fn incompatible_requirements_conflict() {
    let mut cache = MemoryStore::cache();
    cache.add("libx/2.0#r1%10", RecipeInfo::leaf());
    cache.add("liby/1.0#r1%20", requiring(&["libx/1.0"]));

    let err = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("libx/[>=1.0]"), req("liby/1.0")], vec![])
        .unwrap_err();

    match err {
        GraphError::Conflict {
            name,
            requirement1,
            branch1,
            requirement2,
            branch2,
        } => {
            assert_eq!(name, "libx");
            assert_eq!(requirement1, "libx/[>=1.0]");
            assert_eq!(branch1, "consumer");
            assert_eq!(requirement2, "libx/1.0");
            assert_eq!(branch2, "liby/1.0");
        },
        other => panic!("expected conflict, got {other}"),
    }
}

#[test]
fn user_channel_namespaces_do_not_contend() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.0@teama#r1%10", RecipeInfo::leaf());
    cache.add("zlib/2.0@teamb#r1%20", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%30", requiring(&["zlib/1.0@teama"]));
    cache.add("libb/1.0#r1%40", requiring(&["zlib/2.0@teamb"]));

    let graph = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("liba/1.0"), req("libb/1.0")], vec![])?;

    // Same name under different namespaces is two packages, not a
    // conflict.
    assert!(!graph.has_errors());
    let zlib: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.ref_.name == "zlib")
        .map(|n| n.ref_.repr())
        .collect();
    assert_eq!(zlib, ["zlib/1.0@teama", "zlib/2.0@teamb"]);
    Ok(())
}

#[test]
fn private_requirements_resolve_per_branch() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.0#r1%10", RecipeInfo::leaf());
    cache.add("zlib/2.0#r1%20", RecipeInfo::leaf());
    let mut hidden_one = req("zlib/1.0");
    hidden_one.traits.visible = false;
    let mut hidden_two = req("zlib/2.0");
    hidden_two.traits.visible = false;
    cache.add("liba/1.0#r1%30", RecipeInfo {
        requires: vec![hidden_one.clone()],
        ..RecipeInfo::leaf()
    });
    cache.add("libb/1.0#r1%40", RecipeInfo {
        requires: vec![hidden_two],
        ..RecipeInfo::leaf()
    });
    cache.add("libc/1.0#r1%50", RecipeInfo {
        requires: vec![hidden_one],
        ..RecipeInfo::leaf()
    });

    let graph = GraphBuilder::new(&cache, &cache).expand(
        vec![req("liba/1.0"), req("libb/1.0"), req("libc/1.0")],
        vec![],
    )?;

    // Each branch keeps its own pick; identical picks still share a
    // node.
    assert!(!graph.has_errors());
    let versions: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.ref_.name == "zlib")
        .map(|n| n.ref_.version.as_str())
        .collect();
    assert_eq!(versions, ["1.0", "2.0"]);
    Ok(())
}

#[test]
fn disagreeing_ranges_narrow_to_their_intersection() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.0#r1%10", RecipeInfo::leaf());
    cache.add("zlib/1.2#r1%20", RecipeInfo::leaf());
    cache.add("zlib/2.0#r1%30", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%40", requiring(&["zlib/[>=1.0]"]));
    cache.add("libb/1.0#r1%50", requiring(&["zlib/[>=1.0 <2]"]));

    let graph = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("liba/1.0"), req("libb/1.0")], vec![])?;

    // liba alone would take 2.0; libb's upper bound narrows the shared
    // pick instead of conflicting.
    assert!(!graph.has_errors());
    let zlib: Vec<&Node> = graph
        .nodes
        .iter()
        .filter(|n| n.ref_.name == "zlib")
        .collect();
    assert_eq!(zlib.len(), 1);
    assert_eq!(zlib[0].ref_.version.as_str(), "1.2");
    assert_eq!(zlib[0].ref_.revision.as_deref(), Some("r1"));
    Ok(())
}

#[test]
fn empty_range_intersection_still_conflicts() {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.0#r1%10", RecipeInfo::leaf());
    cache.add("zlib/1.2#r1%20", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%30", requiring(&["zlib/[<1.1]"]));
    cache.add("libb/1.0#r1%40", requiring(&["zlib/[>=1.2]"]));

    let err = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("liba/1.0"), req("libb/1.0")], vec![])
        .unwrap_err();
    assert!(matches!(err, GraphError::Conflict { .. }));
}

#[test]
fn cycles_abort_with_every_edge() {
    let mut cache = MemoryStore::cache();
    cache.add("a/1.0#r1%10", requiring(&["b/1.0"]));
    cache.add("b/1.0#r1%20", requiring(&["c/1.0"]));
    cache.add("c/1.0#r1%30", requiring(&["a/1.0"]));

    let err = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("a/1.0")], vec![])
        .unwrap_err();

    match err {
        GraphError::Cycle { edges } => {
            assert_eq!(edges, [
                ("a/1.0".to_string(), "b/1.0".to_string()),
                ("b/1.0".to_string(), "c/1.0".to_string()),
                ("c/1.0".to_string(), "a/1.0".to_string()),
            ]);
        },
        other => panic!("expected cycle, got {other}"),
    }
}

#[test]
fn duplicated_requirements_in_one_recipe() {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.0#r1%10", RecipeInfo::leaf());
    cache.add("zlib/2.0#r1%20", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%30", requiring(&["zlib/1.0", "zlib/2.0"]));

    let err = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("liba/1.0")], vec![])
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicatedRequirement { .. }));
}

#[test]
fn branch_errors_are_aggregated() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("good/1.0#r1%10", RecipeInfo::leaf());

    let graph = GraphBuilder::new(&cache, &cache).expand(
        vec![req("good/1.0"), req("ghost/1.0"), req("phantom/[>=1]")],
        vec![],
    )?;

    // One load failure, one unresolvable range; the good branch expanded.
    assert_eq!(graph.errors.len(), 2);
    assert!(graph.errors.iter().all(|e| e.required_by == ["consumer"]));
    assert!(graph.find("good", Context::Host).is_some());
    assert!(graph.error_report().contains("ghost/1.0"));
    Ok(())
}

#[test]
fn replace_requires_substitutes_before_resolution() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlibng/2.0#r1%10", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%20", requiring(&["zlib/[>=1.0]"]));

    let graph = GraphBuilder::new(&cache, &cache)
        .replace_requires("zlib/*", req("zlibng/2.0"))
        .expand(vec![req("liba/1.0")], vec![])?;

    assert!(!graph.has_errors());
    assert!(graph.find("zlib", Context::Host).is_none());
    assert!(graph.find("zlibng", Context::Host).is_some());
    assert_eq!(
        graph.replaced_requires.get("zlib/*").map(String::as_str),
        Some("zlibng/2.0")
    );
    Ok(())
}

#[test]
fn overrides_replace_transitive_ranges() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.5#r1%10", RecipeInfo::leaf());
    cache.add("zlib/2.0#r1%20", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%30", requiring(&["zlib/[>=1.0 <2]"]));

    let mut override_ = req("zlib/2.0");
    override_.traits.override_ = true;

    let mut root = req("liba/1.0");
    root.traits.override_ = false;
    let graph = GraphBuilder::new(&cache, &cache).expand(vec![root, override_], vec![])?;

    // The override introduced no edge of its own but steered liba's
    // range to 2.0.
    let (_, zlib) = graph.find("zlib", Context::Host).unwrap();
    assert_eq!(zlib.ref_.version.as_str(), "2.0");
    let root_deps: Vec<&str> = graph
        .root()
        .dependencies()
        .map(|d| graph.nodes[d].ref_.name.as_str())
        .collect();
    assert_eq!(root_deps, ["liba"]);
    Ok(())
}

#[test]
fn plain_override_spares_pins_force_does_not() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.0#r1%10", RecipeInfo::leaf());
    cache.add("zlib/2.0#r1%20", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%30", requiring(&["zlib/1.0"]));

    let mut override_ = req("zlib/2.0");
    override_.traits.override_ = true;
    let graph = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("liba/1.0"), override_.clone()], vec![])?;
    let (_, zlib) = graph.find("zlib", Context::Host).unwrap();
    assert_eq!(zlib.ref_.version.as_str(), "1.0");

    override_.traits.force = true;
    let graph = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("liba/1.0"), override_], vec![])?;
    let (_, zlib) = graph.find("zlib", Context::Host).unwrap();
    assert_eq!(zlib.ref_.version.as_str(), "2.0");
    Ok(())
}

#[test]
fn tool_requirements_split_the_build_context() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.0#r1%10", RecipeInfo::leaf());
    cache.add("zlib/2.0#r1%20", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%30", requiring(&["zlib/1.0"]));
    cache.add("cmake/3.25#r1%40", RecipeInfo {
        requires: vec![req("zlib/[>=1.0]")],
        ..RecipeInfo::leaf()
    });

    let graph = GraphBuilder::new(&cache, &cache)
        .expand(vec![req("liba/1.0")], vec![tool("cmake/3.25")])?;

    // zlib exists once per context, at independent versions.
    let (_, host_zlib) = graph.find("zlib", Context::Host).unwrap();
    let (_, build_zlib) = graph.find("zlib", Context::Build).unwrap();
    assert_eq!(host_zlib.ref_.version.as_str(), "1.0");
    assert_eq!(build_zlib.ref_.version.as_str(), "2.0");

    let (_, cmake) = graph.find("cmake", Context::Build).unwrap();
    assert_eq!(cmake.context, Context::Build);
    Ok(())
}

#[test]
fn build_context_resplit_budget_caps_nesting() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("meta/0.1#r1%5", RecipeInfo::leaf());
    cache.add("ninja/1.11#r1%10", RecipeInfo {
        tool_requires: vec![tool("meta/0.1")],
        ..RecipeInfo::leaf()
    });
    cache.add("cmake/3.25#r1%20", RecipeInfo {
        tool_requires: vec![tool("ninja/1.11")],
        ..RecipeInfo::leaf()
    });

    // Default budget of one: cmake pulls ninja into the build context,
    // but ninja's own tool requirement is cut off.
    let graph =
        GraphBuilder::new(&cache, &cache).expand(vec![], vec![tool("cmake/3.25")])?;
    assert!(graph.find("ninja", Context::Build).is_some());
    assert!(graph.find("meta", Context::Build).is_none());

    // A larger budget lets the chain continue one level further.
    let graph = GraphBuilder::new(&cache, &cache)
        .resplit(2)
        .expand(vec![], vec![tool("cmake/3.25")])?;
    assert!(graph.find("meta", Context::Build).is_some());
    Ok(())
}

#[test]
fn strict_lockfile_rejects_unlocked_requirements() {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.2#r1%10", RecipeInfo::leaf());

    let lockfile = Lockfile::new();
    let err = GraphBuilder::new(&cache, &cache)
        .lockfile(&lockfile, true)
        .expand(vec![req("zlib/[>=1.0]")], vec![])
        .unwrap_err();
    assert!(matches!(err, GraphError::Lockfile(_)));
}

#[test]
fn python_requires_resolve_without_nodes() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("pytool/0.1#r1%10", RecipeInfo::leaf());
    cache.add("pytool/0.2#r1%20", RecipeInfo::leaf());
    cache.add("liba/1.0#r1%30", RecipeInfo {
        python_requires: vec![Requirement::parse("pytool/[>=0.1]", RequirementKind::Python)?],
        ..RecipeInfo::leaf()
    });

    let graph = GraphBuilder::new(&cache, &cache).expand(vec![req("liba/1.0")], vec![])?;

    assert!(graph.find("pytool", Context::Host).is_none());
    let (_, liba) = graph.find("liba", Context::Host).unwrap();
    assert_eq!(liba.python_requires.len(), 1);
    assert_eq!(liba.python_requires[0].repr_with_revision(), "pytool/0.2#r1");
    Ok(())
}

#[test]
fn profile_options_reach_the_right_package() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.2#r1%10", RecipeInfo {
        default_options: [("shared".to_string(), "False".to_string())].into(),
        ..RecipeInfo::leaf()
    });
    cache.add("liba/1.0#r1%20", RecipeInfo {
        requires: vec![req("zlib/1.2")],
        default_options: [("shared".to_string(), "False".to_string())].into(),
        ..RecipeInfo::leaf()
    });

    let options = [("zlib:shared".to_string(), "True".to_string())].into();
    let graph = GraphBuilder::new(&cache, &cache)
        .profile(Default::default(), options)
        .expand(vec![req("liba/1.0")], vec![])?;

    let (_, zlib) = graph.find("zlib", Context::Host).unwrap();
    let (_, liba) = graph.find("liba", Context::Host).unwrap();
    assert_eq!(zlib.options.get("shared").map(String::as_str), Some("True"));
    assert_eq!(liba.options.get("shared").map(String::as_str), Some("False"));
    Ok(())
}

#[test]
fn newest_revision_fills_in() -> anyhow::Result<()> {
    let mut cache = MemoryStore::cache();
    cache.add("zlib/1.2#old%10", RecipeInfo::leaf());
    cache.add("zlib/1.2#new%99", RecipeInfo::leaf());

    let graph = GraphBuilder::new(&cache, &cache).expand(vec![req("zlib/1.2")], vec![])?;
    assert_eq!(graph.nodes[1].ref_.repr_with_revision(), "zlib/1.2#new");
    Ok(())
}
