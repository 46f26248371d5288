use std::collections::HashSet;

use super::{InvalidReference, PkgReference, RecipeReference};

fn r(s: &str) -> RecipeReference {
    s.parse().unwrap()
}

#[test]
fn parse_round_trip() -> anyhow::Result<()> {
    for s in [
        "pkg/1.0",
        "pkg/1.0@user",
        "pkg/1.0@user/channel",
        "pkg/1.0@user/channel#abc123",
        "zlib/1.2.11#f3c1e9f0de6b4c9e",
    ] {
        let parsed: RecipeReference = s.parse()?;
        assert_eq!(parsed.repr_with_revision(), s);
    }
    let full: RecipeReference = "pkg/1.0@user/channel#abc123%1700000000".parse()?;
    assert_eq!(full.repr_full(), "pkg/1.0@user/channel#abc123%1700000000");
    Ok(())
}

#[test]
fn parse_failures() {
    assert!(matches!(
        "pkg".parse::<RecipeReference>(),
        Err(InvalidReference::MissingVersion(_))
    ));
    assert!(matches!(
        "/1.0".parse::<RecipeReference>(),
        Err(InvalidReference::MissingName(_))
    ));
    assert!(matches!(
        "pkg/".parse::<RecipeReference>(),
        Err(InvalidReference::MissingVersion(_))
    ));
    // A colon indicates a package reference was passed by mistake.
    assert!(matches!(
        "pkg/1.0:abcd".parse::<RecipeReference>(),
        Err(InvalidReference::PackageReference(_))
    ));
}

#[test]
fn equality_ignores_timestamp() {
    assert_eq!(r("pkg/1.0#rev%100"), r("pkg/1.0#rev%200"));
}

#[test]
fn missing_revision_is_wildcard() {
    assert_eq!(r("pkg/1.0"), r("pkg/1.0#abc"));
    assert_ne!(r("pkg/1.0#abc"), r("pkg/1.0#def"));
}

#[test]
fn hash_ignores_revision() {
    use std::hash::{BuildHasher, RandomState};

    // Two concrete revisions are unequal but must hash alike, so the
    // revisionless wildcard form can look either of them up.
    let state = RandomState::new();
    assert_eq!(
        state.hash_one(&r("pkg/1.0#rev1")),
        state.hash_one(&r("pkg/1.0#rev2"))
    );

    let mut set = HashSet::new();
    set.insert(r("pkg/1.0#rev1"));
    assert!(set.contains(&r("pkg/1.0")));
}

#[test]
fn ordering() {
    let mut refs = vec![r("zlib/1.0"), r("boost/1.0"), r("boost/0.9")];
    refs.sort();
    assert_eq!(refs[0].name, "boost");
    assert_eq!(refs[0].version.as_str(), "0.9");
    assert_eq!(refs[2].name, "zlib");

    // Missing timestamp sorts first.
    let mut refs = vec![r("pkg/1.0#a%50"), r("pkg/1.0#a")];
    refs.sort();
    assert!(refs[0].timestamp.is_none());
}

#[test]
fn validation() {
    assert!(r("zlib/1.2.11").validate(false).is_ok());
    assert!(r("z/1.0").validate(false).is_err()); // name too short
    assert!(r("Zlib/1.0").validate(false).is_err());
    assert!(r("Zlib/1.0").validate(true).is_ok());
    let long = format!("{}/1.0", "a".repeat(250));
    assert!(matches!(
        long.parse::<RecipeReference>().unwrap().validate(false),
        Err(InvalidReference::TooLong(_))
    ));
}

#[test]
fn pattern_matching() {
    let ref_ = r("zlib/1.2.11@user/stable#rev1");
    assert!(ref_.matches("zlib/*", false));
    assert!(ref_.matches("zlib/1.2*", false));
    assert!(ref_.matches("*@user/stable", false));
    assert!(!ref_.matches("boost/*", false));
    assert!(ref_.matches("!boost/*", false));
    assert!(!ref_.matches("~zlib/*", false));

    // Trailing `@` means "no user/channel".
    let bare = r("zlib/1.2.11");
    assert!(bare.matches("zlib/*@", false));
    assert!(!ref_.matches("zlib/*@", false));

    // `&` matches only the consumer node.
    assert!(bare.matches("&", true));
    assert!(!bare.matches("&", false));
}

#[test]
fn pkg_reference_round_trip() -> anyhow::Result<()> {
    let s = "zlib/1.2.11@user/stable#rrev1:0ab1cd2ef#prev1";
    let pref: PkgReference = s.parse()?;
    assert_eq!(pref.repr(), s);
    assert_eq!(pref.package_id.as_str(), "0ab1cd2ef");
    assert_eq!(pref.revision.as_deref(), Some("prev1"));

    let full: PkgReference = "zlib/1.2.11#r:id#p%42".parse()?;
    assert_eq!(full.repr_full(), "zlib/1.2.11#r:id#p%42");
    Ok(())
}

#[test]
fn pkg_reference_equality_ignores_timestamp() -> anyhow::Result<()> {
    let a: PkgReference = "zlib/1.0#r:id#p%100".parse()?;
    let b: PkgReference = "zlib/1.0#r:id#p%200".parse()?;
    assert_eq!(a, b);
    let c: PkgReference = "zlib/1.0#r:id#q".parse()?;
    assert_ne!(a, c);
    Ok(())
}
