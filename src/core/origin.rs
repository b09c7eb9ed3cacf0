//! Origin descriptors and their classification.
use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Kind of backing resource provider, derived from the configured base location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    Http,
    Https,
    File,
    None,
}

impl OriginKind {
    /// Classify a base location: URL schemes first, any other string is a local path.
    pub fn classify(base: Option<&str>) -> Self {
        match base.map(str::trim) {
            None | Some("") => OriginKind::None,
            Some(base) if base.starts_with("https://") => OriginKind::Https,
            Some(base) if base.starts_with("http://") => OriginKind::Http,
            Some(_) => OriginKind::File,
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OriginKind::Http => "http",
            OriginKind::Https => "https",
            OriginKind::File => "file",
            OriginKind::None => "none",
        };
        f.write_str(label)
    }
}

/// Logical origin attached to the request before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginDescriptor {
    pub id: String,
    pub domain_name: String,
    #[serde(default)]
    pub origin_path: String,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    pub kind: OriginKind,
}

impl OriginDescriptor {
    pub fn new(
        id: impl Into<String>,
        domain_name: impl Into<String>,
        origin_path: impl Into<String>,
        custom_headers: BTreeMap<String, String>,
        base: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            domain_name: domain_name.into(),
            origin_path: origin_path.into(),
            custom_headers,
            kind: OriginKind::classify(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(OriginKind::classify(None), OriginKind::None);
        assert_eq!(OriginKind::classify(Some("  ")), OriginKind::None);
        assert_eq!(
            OriginKind::classify(Some("https://example.com")),
            OriginKind::Https
        );
        assert_eq!(
            OriginKind::classify(Some("http://localhost:3000")),
            OriginKind::Http
        );
        assert_eq!(OriginKind::classify(Some("./public")), OriginKind::File);
        assert_eq!(OriginKind::classify(Some("/srv/www")), OriginKind::File);
    }
}
