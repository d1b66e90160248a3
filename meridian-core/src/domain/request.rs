//! The view of an inbound request the routing pipeline works on.

use std::net::{IpAddr, SocketAddr};

use url::{form_urlencoded, Url};

/// Everything the pipeline needs to know about one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Absolute URL as the client addressed it.
    pub url: Url,
    /// Host the request was addressed to, lowercased and without port.
    pub host: String,
    /// Client address.
    pub client: SocketAddr,
    /// Local address the request arrived on.
    pub server: SocketAddr,
    /// HTTP version, e.g. `HTTP/1.1`.
    pub protocol: String,
    /// Cookies in header order.
    pub cookies: Vec<(String, String)>,
    /// User-Agent header.
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Build a context for `url` as received from `client` on `server`.
    pub fn new(url: Url, client: SocketAddr, server: SocketAddr) -> Self {
        let host = normalize_host(url.host_str().unwrap_or_default());
        Self {
            url,
            host,
            client,
            server,
            protocol: "HTTP/1.1".to_string(),
            cookies: Vec::new(),
            user_agent: None,
        }
    }

    /// Parse a `Cookie` header (`a=b; c=d`) and append its cookies.
    pub fn with_cookie_header(mut self, header: &str) -> Self {
        for pair in header.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            self.cookies
                .push((name.trim().to_string(), value.trim().trim_matches('"').to_string()));
        }
        self
    }

    /// Set the User-Agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the protocol version string.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Client IP address.
    pub fn client_ip(&self) -> IpAddr {
        self.client.ip()
    }

    /// First value of a query parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// First cookie with the given name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Lowercase a host and strip any port, keeping bracketed IPv6 literals intact.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if raw.starts_with('[') {
        match raw.find(']') {
            Some(end) => &raw[..=end],
            None => raw,
        }
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => raw,
        }
    };
    host.to_ascii_lowercase()
}

/// Remove every query parameter named in `names`.
///
/// Remaining parameters keep their original encoding byte for byte.
pub fn strip_query_params(url: &mut Url, names: &[String]) {
    if names.is_empty() {
        return;
    }
    let Some(query) = url.query() else {
        return;
    };
    let kept = retained_segments(query, |name| names.iter().any(|n| n == name)).join("&");
    set_raw_query(url, kept);
}

/// Set each `(name, value)` pair, replacing existing parameters of the same name.
///
/// Untouched parameters keep their original encoding and position; the new
/// pairs are form encoded and appended in order.
pub fn replace_query_params(url: &mut Url, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        return;
    }
    let mut query = retained_segments(url.query().unwrap_or_default(), |name| {
        pairs.iter().any(|(n, _)| n == name)
    })
    .join("&");
    let appended = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(&appended);
    set_raw_query(url, query);
}

fn retained_segments(query: &str, mut remove: impl FnMut(&str) -> bool) -> Vec<&str> {
    query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| match form_urlencoded::parse(segment.as_bytes()).next() {
            Some((name, _)) => !remove(&*name),
            None => true,
        })
        .collect()
}

fn set_raw_query(url: &mut Url, query: String) {
    if query.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&query));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(url: &str) -> RequestContext {
        RequestContext::new(
            Url::parse(url).unwrap(),
            "10.0.0.1:40000".parse().unwrap(),
            "10.0.0.2:80".parse().unwrap(),
        )
    }

    #[test]
    fn host_is_normalized() {
        assert_eq!(normalize_host("CDN.Example.com:8080"), "cdn.example.com");
        assert_eq!(normalize_host("[::1]:443"), "[::1]");
        assert_eq!(normalize_host("example.com"), "example.com");
        assert_eq!(ctx("http://Media.Example.com:81/a").host, "media.example.com");
    }

    #[test]
    fn cookies_are_parsed() {
        let req = ctx("http://h/").with_cookie_header("a=1; vxtoken=\"abc=\"; flag");
        assert_eq!(req.cookie("vxtoken"), Some("abc="));
        assert_eq!(req.cookie("flag"), Some(""));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn strip_removes_only_named_params() {
        let mut url = Url::parse("http://h/p?a=1&authToken=x&b=2").unwrap();
        strip_query_params(&mut url, &["authToken".to_string()]);
        assert_eq!(url.as_str(), "http://h/p?a=1&b=2");

        strip_query_params(&mut url, &["a".to_string(), "b".to_string()]);
        assert_eq!(url.as_str(), "http://h/p");
    }

    #[test]
    fn replace_overwrites_existing_values() {
        let mut url = Url::parse("http://h/p?a=1&t=old").unwrap();
        replace_query_params(&mut url, &[("t".to_string(), "new".to_string())]);
        assert_eq!(url.as_str(), "http://h/p?a=1&t=new");
    }

    #[test]
    fn untouched_params_keep_their_encoding() {
        let mut url = Url::parse("http://h/p?q=a%20b&p=x/y&flag&authToken=x").unwrap();
        strip_query_params(&mut url, &["authToken".to_string()]);
        assert_eq!(url.as_str(), "http://h/p?q=a%20b&p=x/y&flag");

        replace_query_params(&mut url, &[("t".to_string(), "a b/c".to_string())]);
        assert_eq!(url.as_str(), "http://h/p?q=a%20b&p=x/y&flag&t=a+b%2Fc");

        replace_query_params(&mut url, &[("flag".to_string(), "1".to_string())]);
        assert_eq!(url.as_str(), "http://h/p?q=a%20b&p=x/y&t=a+b%2Fc&flag=1");
    }

    #[test]
    fn replace_on_empty_query_appends() {
        let mut url = Url::parse("http://h/p").unwrap();
        replace_query_params(&mut url, &[("a".to_string(), "1".to_string())]);
        assert_eq!(url.as_str(), "http://h/p?a=1");
    }
}
