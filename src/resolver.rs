use std::collections::HashMap;

use regex::Regex;

use crate::{
    ResolverError, DEFAULT_MAPPING_TAG, DEFAULT_SCALAR_TAG, DEFAULT_SEQUENCE_TAG,
};

/// The kind of a node, for resolver dispatch and path-rule filters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Scalar,
    Sequence,
    Mapping,
}

/// One step of the ancestry of a node being composed, innermost last.
#[derive(Clone, Debug, PartialEq)]
pub enum PathStep {
    /// Descending into the item at this index of a sequence.
    Sequence(usize),
    /// Descending into a mapping key.
    MappingKey,
    /// Descending into the value of the given key; `None` when the key is
    /// not a scalar.
    MappingValue(Option<String>),
}

/// One step of a path rule.
#[derive(Clone, Debug)]
pub enum PathCheck {
    /// A sequence item: any index, or one specific index.
    Sequence(Option<usize>),
    /// A mapping value: under any key, or under one specific scalar key.
    /// Key positions never match a path rule.
    Mapping(Option<String>),
}

#[derive(Clone, Debug)]
struct ImplicitRule {
    tag: String,
    pattern: Regex,
}

#[derive(Clone, Debug)]
struct PathRule {
    tag: String,
    path: Vec<PathCheck>,
    kind: Option<NodeKind>,
}

/// Assigns tags to untagged nodes.
///
/// Two mechanisms: an *implicit* table of `(tag, pattern)` pairs bucketed by
/// the first character of a plain scalar (first match wins; later
/// registrations on the same bucket shadow earlier ones), and *path* rules
/// that assign a tag to a node based on where in the document it sits.
///
/// The table is immutable once handed to a composer; cloning a preset and
/// extending the clone is the way to customize resolution.
#[derive(Clone, Debug)]
pub struct Resolver {
    by_first: HashMap<char, Vec<ImplicitRule>>,
    by_empty: Vec<ImplicitRule>,
    catchall: Vec<ImplicitRule>,
    path_rules: Vec<PathRule>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// A resolver with no implicit patterns: every scalar resolves to
    /// `!!str`.
    pub fn new() -> Resolver {
        Resolver {
            by_first: HashMap::new(),
            by_empty: Vec::new(),
            catchall: Vec::new(),
            path_rules: Vec::new(),
        }
    }

    /// The YAML 1.1 tag set: bool, int, float (with sexagesimals and
    /// underscores), null, timestamp, merge and value keys.
    pub fn yaml11() -> Resolver {
        let mut resolver = Resolver::new();
        resolver.preset(
            "tag:yaml.org,2002:bool",
            "^(?:yes|Yes|YES|no|No|NO|true|True|TRUE|false|False|FALSE|on|On|ON|off|Off|OFF)$",
            Some("yYnNtTfFoO"),
        );
        resolver.preset(
            "tag:yaml.org,2002:float",
            "^(?:[-+]?(?:[0-9][0-9_]*)\\.[0-9_]*(?:[eE][-+][0-9]+)?|\\.[0-9][0-9_]*(?:[eE][-+][0-9]+)?|[-+]?[0-9][0-9_]*(?::[0-5]?[0-9])+\\.[0-9_]*|[-+]?\\.(?:inf|Inf|INF)|\\.(?:nan|NaN|NAN))$",
            Some("-+0123456789."),
        );
        resolver.preset(
            "tag:yaml.org,2002:int",
            "^(?:[-+]?0b[0-1_]+|[-+]?0[0-7_]+|[-+]?(?:0|[1-9][0-9_]*)|[-+]?0x[0-9a-fA-F_]+|[-+]?[1-9][0-9_]*(?::[0-5]?[0-9])+)$",
            Some("-+0123456789"),
        );
        resolver.preset("tag:yaml.org,2002:merge", "^(?:<<)$", Some("<"));
        resolver.preset(
            "tag:yaml.org,2002:null",
            "^(?:~|null|Null|NULL|)$",
            Some("~nN"),
        );
        resolver.preset("tag:yaml.org,2002:null", "^(?:~|null|Null|NULL|)$", Some(""));
        resolver.preset(
            "tag:yaml.org,2002:timestamp",
            "^(?:[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]|[0-9][0-9][0-9][0-9]-[0-9][0-9]?-[0-9][0-9]?(?:[Tt]|[ \\t]+)[0-9][0-9]?:[0-9][0-9]:[0-9][0-9](?:\\.[0-9]*)?(?:[ \\t]*(?:Z|[-+][0-9][0-9]?(?::[0-9][0-9])?))?)$",
            Some("0123456789"),
        );
        resolver.preset("tag:yaml.org,2002:value", "^(?:=)$", Some("="));
        resolver
    }

    /// The YAML 1.2 Core schema tag set.
    pub fn core_schema() -> Resolver {
        let mut resolver = Resolver::new();
        resolver.preset(
            "tag:yaml.org,2002:bool",
            "^(?:true|True|TRUE|false|False|FALSE)$",
            Some("tTfF"),
        );
        resolver.preset(
            "tag:yaml.org,2002:int",
            "^(?:[-+]?[0-9]+|0o[0-7]+|0x[0-9a-fA-F]+)$",
            Some("-+0123456789"),
        );
        resolver.preset(
            "tag:yaml.org,2002:float",
            "^(?:[-+]?(?:\\.[0-9]+|[0-9]+(?:\\.[0-9]*)?)(?:[eE][-+]?[0-9]+)?|[-+]?\\.(?:inf|Inf|INF)|\\.(?:nan|NaN|NAN))$",
            Some("-+0123456789."),
        );
        resolver.preset(
            "tag:yaml.org,2002:null",
            "^(?:~|null|Null|NULL|)$",
            Some("~nN"),
        );
        resolver.preset("tag:yaml.org,2002:null", "^(?:~|null|Null|NULL|)$", Some(""));
        resolver
    }

    /// The JSON schema tag set: only the exact JSON spellings resolve.
    pub fn json_schema() -> Resolver {
        let mut resolver = Resolver::new();
        resolver.preset("tag:yaml.org,2002:bool", "^(?:true|false)$", Some("tf"));
        resolver.preset(
            "tag:yaml.org,2002:int",
            "^-?(?:0|[1-9][0-9]*)$",
            Some("-0123456789"),
        );
        resolver.preset(
            "tag:yaml.org,2002:float",
            "^-?(?:0|[1-9][0-9]*)(?:\\.[0-9]*)?(?:[eE][-+]?[0-9]+)?$",
            Some("-0123456789"),
        );
        resolver.preset("tag:yaml.org,2002:null", "^null$", Some("n"));
        resolver
    }

    fn preset(&mut self, tag: &str, pattern: &str, first: Option<&str>) {
        self.add_implicit_resolver(tag, pattern, first)
            .expect("preset pattern is valid");
    }

    /// Register an implicit pattern.
    ///
    /// `first` holds the characters a matching value may start with; the
    /// empty string registers the rule for empty values; `None` registers a
    /// catch-all consulted for every value, after its bucket.
    pub fn add_implicit_resolver(
        &mut self,
        tag: &str,
        pattern: &str,
        first: Option<&str>,
    ) -> Result<(), ResolverError> {
        if tag.is_empty() {
            return Err(ResolverError::Problem("tag must not be empty"));
        }
        let pattern = Regex::new(pattern)?;
        let rule = ImplicitRule {
            tag: String::from(tag),
            pattern,
        };
        match first {
            None => self.catchall.push(rule),
            Some("") => self.by_empty.push(rule),
            Some(first) => {
                for ch in first.chars() {
                    self.by_first.entry(ch).or_default().push(rule.clone());
                }
            }
        }
        Ok(())
    }

    /// Register a path rule: a node whose ancestry matches `path` (and whose
    /// kind matches `kind`, if given) receives `tag`.
    pub fn add_path_resolver(
        &mut self,
        tag: &str,
        path: Vec<PathCheck>,
        kind: Option<NodeKind>,
    ) -> Result<(), ResolverError> {
        if tag.is_empty() {
            return Err(ResolverError::Problem("tag must not be empty"));
        }
        self.path_rules.push(PathRule {
            tag: String::from(tag),
            path,
            kind,
        });
        Ok(())
    }

    pub(crate) fn has_path_rules(&self) -> bool {
        !self.path_rules.is_empty()
    }

    /// Deduce the tag of an untagged node.
    ///
    /// `implicit` is the plain-implicit flag of the event: only plainly
    /// written scalars are eligible for pattern resolution. Registration
    /// order matters; within a bucket, the first matching pattern wins and
    /// later registrations are consulted first.
    pub fn resolve(
        &self,
        kind: NodeKind,
        value: &str,
        implicit: bool,
        path: &[PathStep],
    ) -> String {
        if kind == NodeKind::Scalar && implicit {
            let empty = Vec::new();
            let bucket = if value.is_empty() {
                &self.by_empty
            } else {
                let first = value.chars().next().expect("non-empty value");
                self.by_first.get(&first).unwrap_or(&empty)
            };
            // Shadowing: the most recent registration on a bucket wins.
            for rule in bucket.iter().rev().chain(self.catchall.iter().rev()) {
                if rule.pattern.is_match(value) {
                    return rule.tag.clone();
                }
            }
        }
        for rule in &self.path_rules {
            if rule.kind.is_some() && rule.kind != Some(kind) {
                continue;
            }
            if path_matches(&rule.path, path) {
                return rule.tag.clone();
            }
        }
        match kind {
            NodeKind::Scalar => String::from(DEFAULT_SCALAR_TAG),
            NodeKind::Sequence => String::from(DEFAULT_SEQUENCE_TAG),
            NodeKind::Mapping => String::from(DEFAULT_MAPPING_TAG),
        }
    }
}

fn path_matches(checks: &[PathCheck], path: &[PathStep]) -> bool {
    if checks.len() != path.len() {
        return false;
    }
    checks.iter().zip(path.iter()).all(|(check, step)| {
        match (check, step) {
            (PathCheck::Sequence(None), PathStep::Sequence(_)) => true,
            (PathCheck::Sequence(Some(want)), PathStep::Sequence(index)) => want == index,
            (PathCheck::Mapping(None), PathStep::MappingValue(_)) => true,
            (PathCheck::Mapping(Some(want)), PathStep::MappingValue(Some(key))) => want == key,
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolve_plain(resolver: &Resolver, value: &str) -> String {
        resolver.resolve(NodeKind::Scalar, value, true, &[])
    }

    #[test]
    fn yaml11_implicit_types() {
        let resolver = Resolver::yaml11();
        assert_eq!(resolve_plain(&resolver, "yes"), "tag:yaml.org,2002:bool");
        assert_eq!(resolve_plain(&resolver, "off"), "tag:yaml.org,2002:bool");
        assert_eq!(resolve_plain(&resolver, "12"), "tag:yaml.org,2002:int");
        assert_eq!(resolve_plain(&resolver, "0x1F"), "tag:yaml.org,2002:int");
        assert_eq!(resolve_plain(&resolver, "1_000"), "tag:yaml.org,2002:int");
        assert_eq!(resolve_plain(&resolver, "1:30"), "tag:yaml.org,2002:int");
        assert_eq!(resolve_plain(&resolver, "3.14"), "tag:yaml.org,2002:float");
        assert_eq!(resolve_plain(&resolver, ".inf"), "tag:yaml.org,2002:float");
        assert_eq!(resolve_plain(&resolver, "~"), "tag:yaml.org,2002:null");
        assert_eq!(resolve_plain(&resolver, ""), "tag:yaml.org,2002:null");
        assert_eq!(
            resolve_plain(&resolver, "2001-12-14"),
            "tag:yaml.org,2002:timestamp"
        );
        assert_eq!(resolve_plain(&resolver, "<<"), "tag:yaml.org,2002:merge");
        assert_eq!(resolve_plain(&resolver, "="), "tag:yaml.org,2002:value");
        assert_eq!(resolve_plain(&resolver, "plain text"), "tag:yaml.org,2002:str");
    }

    #[test]
    fn non_implicit_scalars_resolve_to_str() {
        let resolver = Resolver::yaml11();
        assert_eq!(
            resolver.resolve(NodeKind::Scalar, "12", false, &[]),
            "tag:yaml.org,2002:str"
        );
    }

    #[test]
    fn core_schema_differs_from_yaml11() {
        let resolver = Resolver::core_schema();
        assert_eq!(resolve_plain(&resolver, "yes"), "tag:yaml.org,2002:str");
        assert_eq!(resolve_plain(&resolver, "true"), "tag:yaml.org,2002:bool");
        assert_eq!(resolve_plain(&resolver, "0o17"), "tag:yaml.org,2002:int");
        assert_eq!(resolve_plain(&resolver, "1_000"), "tag:yaml.org,2002:str");
    }

    #[test]
    fn json_schema_is_strict() {
        let resolver = Resolver::json_schema();
        assert_eq!(resolve_plain(&resolver, "true"), "tag:yaml.org,2002:bool");
        assert_eq!(resolve_plain(&resolver, "True"), "tag:yaml.org,2002:str");
        assert_eq!(resolve_plain(&resolver, "01"), "tag:yaml.org,2002:str");
        assert_eq!(resolve_plain(&resolver, "-12"), "tag:yaml.org,2002:int");
    }

    #[test]
    fn later_registration_shadows_earlier() {
        let mut resolver = Resolver::yaml11();
        resolver
            .add_implicit_resolver("!version", "^[0-9]+$", Some("0123456789"))
            .unwrap();
        assert_eq!(resolve_plain(&resolver, "42"), "!version");
        // Other buckets are untouched.
        assert_eq!(resolve_plain(&resolver, "-42"), "tag:yaml.org,2002:int");
    }

    #[test]
    fn collections_use_kind_defaults() {
        let resolver = Resolver::yaml11();
        assert_eq!(
            resolver.resolve(NodeKind::Sequence, "", false, &[]),
            "tag:yaml.org,2002:seq"
        );
        assert_eq!(
            resolver.resolve(NodeKind::Mapping, "", false, &[]),
            "tag:yaml.org,2002:map"
        );
    }

    #[test]
    fn path_rules_match_structurally() {
        let mut resolver = Resolver::yaml11();
        resolver
            .add_path_resolver(
                "!port",
                vec![
                    PathCheck::Mapping(Some(String::from("services"))),
                    PathCheck::Sequence(None),
                ],
                Some(NodeKind::Scalar),
            )
            .unwrap();
        let path = vec![
            PathStep::MappingValue(Some(String::from("services"))),
            PathStep::Sequence(3),
        ];
        assert_eq!(
            resolver.resolve(NodeKind::Scalar, "value", false, &path),
            "!port"
        );
        // A different ancestry falls back to the default.
        let other = vec![PathStep::Sequence(0), PathStep::Sequence(3)];
        assert_eq!(
            resolver.resolve(NodeKind::Scalar, "value", false, &other),
            "tag:yaml.org,2002:str"
        );
        // The kind filter applies.
        assert_eq!(
            resolver.resolve(NodeKind::Mapping, "", false, &path),
            "tag:yaml.org,2002:map"
        );
    }

    #[test]
    fn malformed_pattern_is_rejected() {
        let mut resolver = Resolver::new();
        assert!(matches!(
            resolver.add_implicit_resolver("!bad", "^(unclosed$", Some("u")),
            Err(ResolverError::Pattern(_))
        ));
    }
}
