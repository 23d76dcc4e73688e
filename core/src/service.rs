//! Service Registry (spec component C2): published (path -> argv template)
//! entries, and the argv-template substitution that turns a service plus a
//! client's URL fragments into a concrete argv.

use crate::error::CoreError;

/// One `key=value` pair captured from the client's URL query at handshake.
/// Kept as an ordered pair list (not a map) because substitution explicitly
/// resolves ties by first-in-insertion-order, and duplicate keys are legal.
pub type Fragment = (String, String);

/// A published endpoint: a URL path mapped to an argv template.
#[derive(Debug, Clone)]
pub struct Service {
    pub path: String,
    /// argv[0] is the program; later elements may contain `{name}` placeholders.
    pub argv: Vec<String>,
}

impl Service {
    pub fn new(path: impl Into<String>, argv: Vec<String>) -> Result<Self, CoreError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(CoreError::Service(format!(
                "service path must start with '/': {path:?}"
            )));
        }
        if argv.is_empty() {
            return Err(CoreError::Service(format!(
                "service {path:?} has an empty argv template"
            )));
        }
        Ok(Self { path, argv })
    }

    /// The directory prefix of this service's path, up to and including its
    /// last `/`. Used to match `auth_token.js` requests (section 4.6).
    pub fn dir(&self) -> &str {
        match self.path.rfind('/') {
            Some(i) => &self.path[..=i],
            None => "/",
        }
    }
}

/// Insertion-ordered, exact-match table of services.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<Service>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<Service>) -> Result<Self, CoreError> {
        for (i, s) in services.iter().enumerate() {
            if services[..i].iter().any(|o| o.path == s.path) {
                return Err(CoreError::Service(format!(
                    "duplicate service path: {:?}",
                    s.path
                )));
            }
        }
        Ok(Self { services })
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    /// Exact-match lookup; no prefix routing.
    pub fn resolve(&self, path: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.path == path)
    }

    /// Whether `request_path` names the `auth_token.js` sibling of any
    /// registered service's directory (section 4.6 and the open question in
    /// spec section 9: treated as matching any service, not just the one
    /// selected for this connection).
    pub fn matches_auth_token_path(&self, request_path: &str) -> bool {
        self.services
            .iter()
            .any(|s| auth_token_js_path(s.path.as_str()) == request_path)
    }
}

fn auth_token_js_path(service_path: &str) -> String {
    let dir = match service_path.rfind('/') {
        Some(i) => &service_path[..=i],
        None => "/",
    };
    format!("{dir}auth_token.js")
}

/// Copy argv[0] verbatim, substitute every subsequent element against
/// `fragments`. Never recurses: a substituted value containing `{...}` is not
/// re-scanned (spec section 4.1 and the invariant in section 8).
pub fn substitute_argv(template: &[String], fragments: &[Fragment]) -> Vec<String> {
    let mut out = Vec::with_capacity(template.len());
    for (i, elem) in template.iter().enumerate() {
        if i == 0 {
            out.push(elem.clone());
        } else {
            out.push(substitute_element(elem, fragments));
        }
    }
    out
}

/// Left-to-right, non-recursive `{name}` substitution against one template
/// element. A `{` that does not open a `name}` matching a known fragment key
/// is left intact, byte for byte.
fn substitute_element(elem: &str, fragments: &[Fragment]) -> String {
    let bytes = elem.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some((key, value)) = find_matching_fragment(bytes, i, fragments) {
                out.extend_from_slice(value.as_bytes());
                i += 1 + key.len() + 1; // '{' + key + '}'
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// First fragment (in insertion order) whose key immediately follows `{` at
/// `open_brace` and is immediately followed by `}`.
fn find_matching_fragment<'a>(
    bytes: &[u8],
    open_brace: usize,
    fragments: &'a [Fragment],
) -> Option<(&'a str, &'a str)> {
    for (key, value) in fragments {
        let klen = key.len();
        let key_start = open_brace + 1;
        let close = key_start + klen;
        if close < bytes.len()
            && bytes.get(key_start..close) == Some(key.as_bytes())
            && bytes[close] == b'}'
        {
            return Some((key.as_str(), value.as_str()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(pairs: &[(&str, &str)]) -> Vec<Fragment> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_single_placeholder() {
        let template = vec!["sh".to_string(), "-c".to_string(), "echo {name}".to_string()];
        let fragments = frag(&[("name", "world")]);
        assert_eq!(
            substitute_argv(&template, &fragments),
            vec!["sh", "-c", "echo world"]
        );
    }

    #[test]
    fn leaves_unmatched_braces_intact() {
        let template = vec!["sh".to_string(), "-c".to_string(), "echo {missing}".to_string()];
        assert_eq!(
            substitute_argv(&template, &[]),
            vec!["sh", "-c", "echo {missing}"]
        );
    }

    #[test]
    fn first_matching_fragment_wins() {
        let template = vec!["echo".to_string(), "{name}".to_string()];
        let fragments = frag(&[("name", "first"), ("name", "second")]);
        assert_eq!(substitute_argv(&template, &fragments), vec!["echo", "first"]);
    }

    #[test]
    fn substitution_does_not_recurse() {
        let template = vec!["echo".to_string(), "{a}".to_string()];
        let fragments = frag(&[("a", "{b}"), ("b", "oops")]);
        assert_eq!(substitute_argv(&template, &fragments), vec!["echo", "{b}"]);
    }

    #[test]
    fn multiple_placeholders_in_one_element() {
        let template = vec!["echo".to_string(), "{greeting} {name}".to_string()];
        let fragments = frag(&[("greeting", "hi"), ("name", "world")]);
        assert_eq!(
            substitute_argv(&template, &fragments),
            vec!["echo", "hi world"]
        );
    }

    #[test]
    fn argv0_is_never_substituted() {
        let template = vec!["{prog}".to_string()];
        let fragments = frag(&[("prog", "sh")]);
        assert_eq!(substitute_argv(&template, &fragments), vec!["{prog}"]);
    }

    #[test]
    fn service_path_must_start_with_slash() {
        assert!(Service::new("run", vec!["sh".into()]).is_err());
    }

    #[test]
    fn service_argv_must_be_non_empty() {
        assert!(Service::new("/run", vec![]).is_err());
    }

    #[test]
    fn service_dir_is_prefix_up_to_last_slash() {
        let s = Service::new("/foo/bar", vec!["sh".into()]).unwrap();
        assert_eq!(s.dir(), "/foo/");
        let s = Service::new("/", vec!["sh".into()]).unwrap();
        assert_eq!(s.dir(), "/");
    }

    #[test]
    fn registry_rejects_duplicate_paths() {
        let services = vec![
            Service::new("/", vec!["sh".into()]).unwrap(),
            Service::new("/", vec!["bash".into()]).unwrap(),
        ];
        assert!(ServiceRegistry::new(services).is_err());
    }

    #[test]
    fn registry_resolves_exact_path_only() {
        let services = vec![Service::new("/run", vec!["sh".into()]).unwrap()];
        let reg = ServiceRegistry::new(services).unwrap();
        assert!(reg.resolve("/run").is_some());
        assert!(reg.resolve("/run/extra").is_none());
        assert!(reg.resolve("/").is_none());
    }

    #[test]
    fn auth_token_path_matches_any_service_dir() {
        let services = vec![
            Service::new("/", vec!["sh".into()]).unwrap(),
            Service::new("/admin/run", vec!["sh".into()]).unwrap(),
        ];
        let reg = ServiceRegistry::new(services).unwrap();
        assert!(reg.matches_auth_token_path("/auth_token.js"));
        assert!(reg.matches_auth_token_path("/admin/auth_token.js"));
        assert!(!reg.matches_auth_token_path("/other/auth_token.js"));
    }
}
