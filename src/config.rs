use memchr::memmem;

use crate::pump::DEFAULT_BUFFER_SIZE;

/// Literal-for-literal rewrite applied to relayed traffic.
///
/// Client bytes have `local` replaced by `remote` on their way to the server;
/// server bytes get the inverse mapping on their way back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    local: Vec<u8>,
    remote: Vec<u8>,
}

impl Substitution {
    /// `None` unless both literals are non-empty
    pub fn new(local: impl Into<Vec<u8>>, remote: impl Into<Vec<u8>>) -> Option<Self> {
        let (local, remote) = (local.into(), remote.into());
        if local.is_empty() || remote.is_empty() {
            return None;
        }
        Some(Self { local, remote })
    }

    pub fn to_server(&self, data: &[u8]) -> Vec<u8> {
        replace_all(data, &self.local, &self.remote)
    }

    pub fn to_client(&self, data: &[u8]) -> Vec<u8> {
        replace_all(data, &self.remote, &self.local)
    }
}

/// Replace every non-overlapping occurrence of `needle`, scanning left to right
pub fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut last = 0;
    for pos in memmem::find_iter(haystack, needle) {
        out.extend_from_slice(&haystack[last..pos]);
        out.extend_from_slice(replacement);
        last = pos + needle.len();
    }
    out.extend_from_slice(&haystack[last..]);
    out
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memmem::find(haystack, needle)
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    memmem::find(haystack, needle).is_some()
}

/// Immutable process-wide settings shared by every session
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream target as `host:port`
    pub upstream: String,
    pub substitution: Option<Substitution>,
    pub buffer_size: usize,
}

impl ProxyConfig {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            substitution: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_substitution(mut self, substitution: Option<Substitution>) -> Self {
        self.substitution = substitution;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Host part of the upstream target, used as the TLS server name
    pub fn upstream_host(&self) -> &str {
        let target = self.upstream.as_str();
        let host = match target.rfind(':') {
            Some(pos) => &target[..pos],
            None => target,
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }
}
