//! Static header injection for remote MCP round-trips (§4.7 "Header injection").

/// A small set of headers applied to every request sent to one remote MCP source. Not a real
/// `tower`/`reqwest-middleware` layer — the sources that need it call
/// [`HeaderInjector::apply`] directly on their `RequestBuilder`, mirroring the corpus's
/// `headers: Vec<(String, String)>` pattern rather than pulling in a separate middleware crate.
#[derive(Clone, Debug, Default)]
pub struct HeaderInjector {
    headers: Vec<(String, String)>,
}

impl HeaderInjector {
    pub fn new(headers: impl IntoIterator<Item = (String, String)>) -> Self {
        Self { headers: headers.into_iter().collect() }
    }

    pub fn apply(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_injector_is_a_no_op() {
        let injector = HeaderInjector::default();
        assert!(injector.headers.is_empty());
    }
}
