use super::{Version, VersionError, VersionRange, VersionSpec};

fn v(s: &str) -> Version {
    s.parse().unwrap()
}

#[test]
fn ordering_basics() {
    assert!(v("1.0") < v("1.1"));
    assert!(v("1.9") < v("1.10"));
    assert!(v("2") < v("10"));
    assert!(v("1.0") < v("1.0.0"));
    assert!(v("1.0.0-rc1") < v("1.0.0"));
    assert!(v("1.0.0-rc1") < v("1.0.0-rc2"));
    assert_eq!(v("1.0.0+build1"), v("1.0.0+build2"));
}

#[test]
fn alpha_segments() {
    // A numeric segment sorts below an alphanumeric one.
    assert!(v("1.0") < v("1.0b"));
    assert!(v("1.0a") < v("1.0b"));
}

#[test]
fn accessors() {
    let version = v("1.2.3.4");
    assert_eq!(version.major(), Some(1));
    assert_eq!(version.minor(), Some(2));
    assert_eq!(version.patch(), Some(3));
    assert_eq!(version.truncate(2), "1.2");
    assert_eq!(v("2").minor(), None);
}

#[test]
fn range_contains() {
    let range = VersionRange::parse(">=1.0 <2.0").unwrap();
    assert!(range.contains(&v("1.0")));
    assert!(range.contains(&v("1.5")));
    assert!(!range.contains(&v("2.0")));
    assert!(!range.contains(&v("0.9")));
}

#[test]
fn range_operators() {
    let caret = VersionRange::parse("^1.2").unwrap();
    assert!(caret.contains(&v("1.2")));
    assert!(caret.contains(&v("1.9")));
    assert!(!caret.contains(&v("2.0")));
    assert!(!caret.contains(&v("1.1")));

    let tilde = VersionRange::parse("~1.2").unwrap();
    assert!(tilde.contains(&v("1.2.5")));
    assert!(!tilde.contains(&v("1.3")));

    // A bare version means exact.
    let exact = VersionRange::parse("1.0").unwrap();
    assert!(exact.contains(&v("1.0")));
    assert!(!exact.contains(&v("1.0.1")));
}

#[test]
fn resolution_picks_highest() {
    let range = VersionRange::parse(">=1.0 <2.0").unwrap();
    let pool = [v("1.0"), v("1.1"), v("1.5"), v("2.0")];
    assert_eq!(range.resolve(pool.iter()).unwrap(), &v("1.5"));

    // Monotonic: adding a newer satisfying candidate moves the answer up.
    let pool = [v("1.0"), v("1.1"), v("1.5"), v("1.6"), v("2.0")];
    assert_eq!(range.resolve(pool.iter()).unwrap(), &v("1.6"));
}

#[test]
fn resolution_failure_lists_candidates() {
    let range = VersionRange::parse(">=3.0").unwrap();
    let pool = [v("1.0"), v("2.0")];
    match range.resolve(pool.iter()) {
        Err(VersionError::NotResolved { expr, closest }) => {
            assert_eq!(expr, ">=3.0");
            assert_eq!(closest, vec!["2.0".to_string(), "1.0".to_string()]);
        },
        other => panic!("expected NotResolved, got {other:?}"),
    }
}

#[test]
fn spec_parsing() {
    assert!(matches!(
        VersionSpec::parse("[>=1.0 <2]").unwrap(),
        VersionSpec::Range(_)
    ));
    assert!(matches!(
        VersionSpec::parse("1.0").unwrap(),
        VersionSpec::Exact(_)
    ));
    assert!(VersionSpec::parse("[>=1.0").is_err());
    assert!(VersionSpec::parse("").is_err());
}

#[test]
fn intersection() {
    let a = VersionRange::parse(">=1.0").unwrap();
    let b = VersionRange::parse("<2.0").unwrap();
    let both = a.intersect(&b);
    assert!(both.contains(&v("1.5")));
    assert!(!both.contains(&v("2.1")));
    assert!(!both.contains(&v("0.5")));
}
