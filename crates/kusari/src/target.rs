use std::{fmt, str::FromStr, sync::Arc};

use url::Url;

/// Locator of one remote resource.
///
/// Cloning is cheap, the parsed url is shared.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target(Arc<Url>);

impl Target {
    pub fn new(url: Url) -> Self {
        Self(Arc::new(url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Last non-empty segment of the url path, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.0
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
    }
}

impl FromStr for Target {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Url::parse(s.trim()).map(Self::new)
    }
}

impl From<Url> for Target {
    fn from(url: Url) -> Self {
        Self::new(url)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
