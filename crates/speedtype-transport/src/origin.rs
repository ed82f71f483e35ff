//! Origin allow-list applied to incoming WebSocket handshakes.

/// Which browser origins may open a realtime connection.
///
/// Requests without an `Origin` header (native clients, test harnesses)
/// are always admitted; browsers always send one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OriginPolicy {
    /// Admit every origin.
    #[default]
    Any,
    /// Admit only these exact origins (scheme + host + port).
    AllowList(Vec<String>),
}

impl OriginPolicy {
    /// Builds a policy from a comma-separated list such as
    /// `"http://localhost:3000, https://speedtype.example"`.
    ///
    /// A `*` entry anywhere in the list, or a list with no entries,
    /// yields [`OriginPolicy::Any`].
    pub fn from_list(list: &str) -> Self {
        let origins: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| o.trim_end_matches('/').to_string())
            .collect();

        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            Self::Any
        } else {
            Self::AllowList(origins)
        }
    }

    /// Returns `true` if a handshake carrying `origin` may proceed.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (Self::Any, _) | (_, None) => true,
            (Self::AllowList(list), Some(origin)) => {
                let origin = origin.trim_end_matches('/');
                list.iter().any(|allowed| allowed == origin)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_list_parses_and_trims() {
        let policy = OriginPolicy::from_list(
            " http://localhost:3000 ,https://speedtype.example/ ",
        );
        assert_eq!(
            policy,
            OriginPolicy::AllowList(vec![
                "http://localhost:3000".into(),
                "https://speedtype.example".into(),
            ])
        );
    }

    #[test]
    fn test_from_list_wildcard_is_any() {
        assert_eq!(
            OriginPolicy::from_list("http://localhost:3000,*"),
            OriginPolicy::Any
        );
        assert_eq!(OriginPolicy::from_list(" , "), OriginPolicy::Any);
    }

    #[test]
    fn test_allow_list_matches_exact_origin() {
        let policy = OriginPolicy::from_list("https://speedtype.example");
        assert!(policy.allows(Some("https://speedtype.example")));
        assert!(policy.allows(Some("https://speedtype.example/")));
        assert!(!policy.allows(Some("https://evil.example")));
        assert!(!policy.allows(Some("http://speedtype.example")));
    }

    #[test]
    fn test_missing_origin_is_admitted() {
        let policy = OriginPolicy::from_list("https://speedtype.example");
        assert!(policy.allows(None));
    }
}
