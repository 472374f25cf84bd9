extern crate url;

use self::url::Url;
use core::fmt;

const SEP: char = '/';

/// Gateway address with helpers to reach its endpoints.
#[derive(Clone)]
pub struct Resource {
    url: Url,
}

impl Resource {
    #[must_use]
    pub fn new(uri: &str) -> Option<Resource> {
        let url = Url::parse(uri).ok()?;
        if url.cannot_be_a_base() {
            return None;
        }
        Some(Resource { url })
    }

    /// Appends `path` segments to the current path, keeping a trailing slash
    /// only when `path` has one.
    pub fn append_path(&mut self, path: &str) -> &mut Self {
        let mut segments: Vec<&str> = self
            .url
            .path_segments()
            .map(|s| s.filter(|x| !x.is_empty()).collect())
            .unwrap_or_default();
        segments.extend(path.split(SEP).filter(|x| !x.is_empty()));

        let mut joined = segments.join("/");
        if path.ends_with(SEP) {
            joined.push(SEP);
        }
        self.url.set_path(&joined);
        self
    }

    /// Resolves a server relative reference such as `/download?file=..`.
    #[must_use]
    pub fn follow(&self, reference: &str) -> Option<Resource> {
        let url = self.url.join(reference).ok()?;
        Some(Resource { url })
    }

    /// Value of the first query parameter called `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://localhost:5000", true)]
    #[case("http/localhost", false)]
    #[case("mailto:someone@example.com", false)]
    #[trace]
    fn new_cases(#[case] uri: &str, #[case] valid: bool) {
        // Act
        let r = Resource::new(uri);

        // Assert
        assert_eq!(r.is_some(), valid);
    }

    #[rstest]
    #[case("http://localhost", "convert", "http://localhost/convert")]
    #[case("http://localhost", "/convert", "http://localhost/convert")]
    #[case("http://localhost/", "capabilities/", "http://localhost/capabilities/")]
    #[case("http://localhost/gateway", "convert", "http://localhost/gateway/convert")]
    #[case("http://localhost/gateway/", "/convert", "http://localhost/gateway/convert")]
    #[case("http://localhost/a/", "b/c", "http://localhost/a/b/c")]
    #[trace]
    fn append_path_cases(#[case] base: &str, #[case] path: &str, #[case] expected: &str) {
        // Arrange
        let mut r = Resource::new(base).unwrap();

        // Act
        r.append_path(path);

        // Assert
        assert_eq!(r.to_string(), expected);
    }

    #[test]
    fn append_path_twice() {
        // Arrange
        let mut r = Resource::new("http://localhost").unwrap();

        // Act
        r.append_path("x").append_path("y");

        // Assert
        assert_eq!(r.to_string(), "http://localhost/x/y");
    }

    #[rstest]
    #[case("http://localhost:5000")]
    #[case("http://localhost:5000/")]
    #[trace]
    fn follow_download_reference(#[case] base: &str) {
        // Arrange
        let r = Resource::new(base).unwrap();

        // Act
        let download = r
            .follow("/download?file=0f1e2d3c&name=r%C3%A9sum%C3%A9%20v2.pdf")
            .unwrap();

        // Assert
        assert_eq!(
            download.to_string(),
            "http://localhost:5000/download?file=0f1e2d3c&name=r%C3%A9sum%C3%A9%20v2.pdf"
        );
        assert_eq!(download.query_param("file").as_deref(), Some("0f1e2d3c"));
        assert_eq!(
            download.query_param("name").as_deref(),
            Some("résumé v2.pdf")
        );
        assert_eq!(download.query_param("missing"), None);
    }
}
