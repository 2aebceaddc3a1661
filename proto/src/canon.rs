//! Lexical path canonicalisation.
//!
//! The broker only ever hands canonical paths to the resolver and to backend
//! servers: no duplicate separators, no `.` or `..` components, no trailing
//! separator except on the root itself. `..` never climbs above the base.

use std::fmt;

/// A canonical path produced by [`canonify`].
///
/// Absolute paths start with `/`; relative paths (walks below a descriptor)
/// do not. The empty relative path names the base itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonPathBuf {
    inner: String,
    absolute: bool,
}

impl CanonPathBuf {
    pub fn root() -> Self {
        CanonPathBuf {
            inner: "/".to_string(),
            absolute: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.inner == "/"
    }

    /// The path as the resolver forwards it to a backend: component string
    /// with no leading separator. Empty for the root / the base itself.
    pub fn relative(&self) -> &str {
        if self.absolute {
            self.inner.trim_start_matches('/')
        } else {
            &self.inner
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.relative().split('/').filter(|c| !c.is_empty())
    }
}

impl fmt::Display for CanonPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Canonicalise a raw path string. Returns `None` for paths that cannot be
/// expressed canonically (embedded NUL).
pub fn canonify(raw: &str) -> Option<CanonPathBuf> {
    if raw.contains('\0') {
        return None;
    }
    let absolute = raw.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for component in raw.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                // Never climb above the base.
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    let inner = if absolute {
        let mut s = String::with_capacity(raw.len());
        if parts.is_empty() {
            s.push('/');
        } else {
            for part in &parts {
                s.push('/');
                s.push_str(part);
            }
        }
        s
    } else {
        parts.join("/")
    };
    Some(CanonPathBuf { inner, absolute })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn separators_and_dots_collapse() {
        assert_eq!(canonify("//a///b/./c/").unwrap().as_str(), "/a/b/c");
        assert_eq!(canonify("/a/b/../c").unwrap().as_str(), "/a/c");
        assert_eq!(canonify("/").unwrap().as_str(), "/");
        assert_eq!(canonify("/..").unwrap().as_str(), "/");
        assert_eq!(canonify("/a/..").unwrap().as_str(), "/");
    }

    #[test]
    fn relative_paths_stay_relative() {
        let p = canonify("a/./b//c").unwrap();
        assert!(!p.is_absolute());
        assert_eq!(p.as_str(), "a/b/c");
        assert_eq!(canonify("").unwrap().as_str(), "");
    }

    #[test]
    fn relative_view_strips_the_leading_separator() {
        assert_eq!(canonify("/m/x").unwrap().relative(), "m/x");
        assert_eq!(canonify("/").unwrap().relative(), "");
    }

    #[test]
    fn embedded_nul_is_rejected() {
        assert!(canonify("/a\0b").is_none());
    }

    fn raw_path() -> impl Strategy<Value = String> {
        proptest::collection::vec("[a-z.]{0,3}", 0..8)
            .prop_map(|parts| format!("/{}", parts.join("/")))
    }

    proptest! {
        #[test]
        fn canonify_is_idempotent(raw in raw_path()) {
            let once = canonify(&raw).expect("canonify");
            let twice = canonify(once.as_str()).expect("canonify twice");
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn no_dot_components_survive(raw in raw_path()) {
            let canon = canonify(&raw).expect("canonify");
            for component in canon.components() {
                prop_assert_ne!(component, ".");
                prop_assert_ne!(component, "..");
                prop_assert!(!component.is_empty());
            }
        }

        #[test]
        fn absolute_inputs_stay_absolute(raw in raw_path()) {
            prop_assert!(canonify(&raw).expect("canonify").is_absolute());
        }
    }
}
