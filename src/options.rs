use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Hyper-parameters for mining and querying BMN models.
///
/// The textual form joins the enabled features with `+` and ends with the
/// occurrence threshold, e.g. `cctx+mctx+def+calls+atleast2`.
///
/// ```
/// use bmneval::options::Options;
///
/// let opts: Options = "cctx+calls+atleast3".parse().unwrap();
/// assert!(opts.class_context && opts.calls && !opts.method_context);
/// assert_eq!(opts.at_least, 3);
/// assert_eq!(opts.to_string(), "cctx+calls+atleast3");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Use the enclosing class context as a feature.
    pub class_context: bool,
    /// Use the enclosing method context as a feature.
    pub method_context: bool,
    /// Use the definition site as a feature.
    pub definition: bool,
    /// Use method calls on the instance.
    pub calls: bool,
    /// Use call sites where the instance is passed as an argument.
    pub params: bool,
    /// Use field, property and event references on the instance.
    pub members: bool,
    /// Minimum number of identical observations for a table row to be kept.
    pub at_least: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            class_context: true,
            method_context: true,
            definition: true,
            calls: true,
            params: false,
            members: false,
            at_least: 1,
        }
    }
}

impl Options {
    pub fn with_at_least(mut self, n: u32) -> Self {
        self.at_least = n;
        self
    }

    /// Whether any kind of member access is used as a feature. Without
    /// one, every mined row has an empty access set.
    pub fn uses_any_access(&self) -> bool {
        self.calls || self.params || self.members
    }

    fn flags(&self) -> [(&'static str, bool); 6] {
        [
            ("cctx", self.class_context),
            ("mctx", self.method_context),
            ("def", self.definition),
            ("calls", self.calls),
            ("params", self.params),
            ("members", self.members),
        ]
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, enabled) in self.flags() {
            if enabled {
                write!(f, "{name}+")?;
            }
        }
        write!(f, "atleast{}", self.at_least)
    }
}

impl FromStr for Options {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| Error::Options {
            input: s.to_string(),
            reason,
        };

        let mut opts = Options {
            class_context: false,
            method_context: false,
            definition: false,
            calls: false,
            params: false,
            members: false,
            at_least: 1,
        };

        for token in s.split('+').map(str::trim).filter(|t| !t.is_empty()) {
            let token = token.to_ascii_lowercase();
            match token.as_str() {
                "cctx" => opts.class_context = true,
                "mctx" => opts.method_context = true,
                "def" => opts.definition = true,
                "calls" => opts.calls = true,
                "params" => opts.params = true,
                "members" => opts.members = true,
                other => {
                    let Some(n) = other.strip_prefix("atleast") else {
                        return Err(invalid(format!("unknown flag '{other}'")));
                    };
                    opts.at_least = n.parse().map_err(|_| {
                        invalid(format!("bad threshold '{n}'"))
                    })?;
                }
            }
        }

        if opts.at_least == 0 {
            return Err(invalid("threshold must be at least 1".to_string()));
        }
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_display() {
        assert_eq!(
            Options::default().to_string(),
            "cctx+mctx+def+calls+atleast1"
        );
    }

    #[test]
    fn display_parses_back() {
        let opts = Options {
            params: true,
            members: true,
            ..Options::default()
        }
        .with_at_least(4);
        let parsed: Options = opts.to_string().parse().unwrap();
        assert_eq!(parsed, opts);
    }

    #[test]
    fn parsing_is_case_insensitive_and_tolerates_spaces() {
        let opts: Options = " CCTX + Calls + AtLeast2 ".parse().unwrap();
        assert!(opts.class_context);
        assert!(opts.calls);
        assert!(!opts.definition);
        assert_eq!(opts.at_least, 2);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("cctx+calls+bogus".parse::<Options>().is_err());
        assert!("calls+atleastx".parse::<Options>().is_err());
        assert!("calls+atleast0".parse::<Options>().is_err());
    }

    #[test]
    fn feature_set_without_accesses_is_passed_through() {
        let opts: Options = "cctx+mctx".parse().unwrap();
        assert!(!opts.uses_any_access());
        assert_eq!(opts.to_string(), "cctx+mctx+atleast1");
        assert!(Options::default().uses_any_access());
    }
}
