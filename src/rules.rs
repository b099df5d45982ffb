/// Repository-routing rules, the subset of the conversion rule set that
/// concerns the output engine: which repositories exist, which branches
/// they declare up front, and which of them are prefixed views into
/// another repository.
#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rules {
    #[serde(rename = "repository", default = "Vec::new")]
    pub repositories: Vec<RepoRule>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoRule {
    pub name: String,
    #[serde(default = "Vec::new")]
    pub branches: Vec<String>,
    /// When set, this rule does not create a repository of its own;
    /// operations are forwarded to the named repository with `prefix`
    /// prepended to every file path.
    #[serde(rename = "forward-to")]
    pub forward_to: Option<String>,
    #[serde(default = "String::new")]
    pub prefix: String,
}

pub enum RulesError {
    Io(std::path::PathBuf, std::io::Error),
    Parse(toml::de::Error),
}

impl std::error::Error for RulesError {}

impl std::fmt::Display for RulesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Io(ref path, ref e) => write!(f, "failed to read {path:?}: {e}"),
            Self::Parse(ref e) => write!(f, "failed to parse rules: {e}"),
        }
    }
}

impl std::fmt::Debug for RulesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl Rules {
    pub fn parse(raw: &str) -> Result<Self, RulesError> {
        toml::from_str(raw).map_err(RulesError::Parse)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, RulesError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RulesError::Io(path.to_path_buf(), e))?;
        Self::parse(&raw)
    }
}

impl RepoRule {
    /// A plain repository rule with no declared branches, as a host would
    /// build one outside of a rules file.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.into(),
            branches: Vec::new(),
            forward_to: None,
            prefix: String::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Rules;

    #[test]
    fn test_parse() {
        let rules = Rules::parse(
            r#"
            [[repository]]
            name = "project"
            branches = ["master", "stable"]

            [[repository]]
            name = "subproject"
            forward-to = "project"
            prefix = "sub/"
            "#,
        )
        .unwrap();

        assert_eq!(rules.repositories.len(), 2);
        assert_eq!(rules.repositories[0].name, "project");
        assert_eq!(rules.repositories[0].branches, ["master", "stable"]);
        assert_eq!(rules.repositories[0].forward_to, None);
        assert_eq!(rules.repositories[1].name, "subproject");
        assert_eq!(rules.repositories[1].forward_to.as_deref(), Some("project"));
        assert_eq!(rules.repositories[1].prefix, "sub/");
    }

    #[test]
    fn test_parse_empty() {
        let rules = Rules::parse("").unwrap();
        assert!(rules.repositories.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Rules::parse("[[repository]]\nname = \"a\"\nbogus = 1\n").is_err());
    }
}
