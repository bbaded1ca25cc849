//! RPC call building

use url::form_urlencoded;

use crate::host::hostname_of;

/// A fully built devserver RPC, ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCall {
    method: String,
    url: String,
}

impl RpcCall {
    /// Wrap an already built URL, e.g. a staged file on a devserver
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let method = url::Url::parse(&url)
            .map(|u| u.path().trim_start_matches('/').to_string())
            .unwrap_or_default();
        Self { method, url }
    }

    /// RPC method, e.g. `stage`
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Host part of the target devserver
    pub fn hostname(&self) -> String {
        hostname_of(&self.url)
    }

    /// Query arguments, decoded, in call order
    pub fn args(&self) -> Vec<(String, String)> {
        match self.url.split_once('?') {
            Some((_, query)) => form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Value of one query argument
    pub fn arg(&self, key: &str) -> Option<String> {
        self.args()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

impl std::fmt::Display for RpcCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Argument list of an RPC without arguments
pub const NO_ARGS: [(&str, &str); 0] = [];

/// Python-style boolean argument, as the devserver expects
pub fn bool_arg(value: bool) -> String {
    let literal = if value { "True" } else { "False" };
    literal.to_string()
}

/// Build `<host>/<method>?<args>`.
///
/// An `archive_url` that is not a `gs://` URL names a local directory on the
/// devserver. It is sent as `local_path` with `delete_source=True` so the
/// devserver moves the files instead of copying them. An empty `archive_url`
/// is dropped.
pub fn build_call<I, K, V>(host: &str, method: &str, args: I) -> RpcCall
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut archive_url = None;
    for (key, value) in args {
        let key = key.into();
        let value = value.into();
        if key == "archive_url" {
            archive_url = Some(value);
        } else {
            pairs.push((key, value));
        }
    }

    match archive_url {
        Some(url) if url.is_empty() => {}
        Some(url) if url.starts_with("gs://") => pairs.push(("archive_url".into(), url)),
        Some(path) => {
            pairs.push(("local_path".into(), path));
            pairs.push(("delete_source".into(), bool_arg(true)));
        }
        None => {}
    }

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish();

    RpcCall {
        method: method.to_string(),
        url: format!("{}/{}?{}", host, method, query),
    }
}

/// Split a response into right-trimmed lines
pub fn split_lines(response: &str) -> Vec<String> {
    response.lines().map(|l| l.trim_end().to_string()).collect()
}
