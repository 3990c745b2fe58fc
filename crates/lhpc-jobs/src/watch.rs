//! Watchers fed from files the batch job writes into the state directory.

/// Notebook server URL found in job output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookUrl {
    pub url: String,
    pub host: String,
    pub port: Option<u16>,
}

impl NotebookUrl {
    /// Split a `scheme://host[:port]/...` URL.
    pub fn parse(url: &str) -> Option<Self> {
        let (_, rest) = url.split_once("://")?;
        let authority = rest.split(['/', '?']).next().unwrap_or(rest);
        if authority.is_empty() {
            return None;
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().ok()),
            None => (authority, None),
        };
        Some(Self {
            url: url.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// The same URL reached through a local forwarded port.
    pub fn through_local_port(&self, local_port: u16) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let path_start = rest.find(['/', '?']).unwrap_or(rest.len());
        format!("{scheme}://localhost:{local_port}{}", &rest[path_start..])
    }
}

/// Extract a notebook URL from one output line.
///
/// The line must carry a token and must not be the loopback variant that
/// jupyter prints next to the public one.
pub fn detect_notebook_url(line: &str) -> Option<NotebookUrl> {
    if !line.contains("?token=") || line.contains("127.0.0.1") {
        return None;
    }
    let start = line.find("http:").or_else(|| line.find("https:"))?;
    let url = line[start..].split_whitespace().next()?;
    NotebookUrl::parse(url)
}

/// One-shot watcher over the growing job output.
///
/// Feed it the full output on every tick; only lines it has not seen yet
/// are inspected, and it reports a URL at most once.
#[derive(Debug, Clone, Default)]
pub struct UrlWatcher {
    seen: usize,
    found: Option<NotebookUrl>,
}

impl UrlWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, lines: &[String]) -> Option<NotebookUrl> {
        if self.found.is_some() {
            return None;
        }
        if lines.len() < self.seen {
            // output file was replaced
            self.seen = 0;
        }
        for line in &lines[self.seen..] {
            self.seen += 1;
            if let Some(url) = detect_notebook_url(line) {
                self.found = Some(url.clone());
                return Some(url);
            }
        }
        None
    }

    pub fn found(&self) -> Option<&NotebookUrl> {
        self.found.as_ref()
    }
}

pub const VM_ALLOCATION_ERROR: &str = "0.0.0.0";
pub const VM_NO_SESSION: &str = "0.0.0.1";

/// Content of a `vm_host_<id>.ip` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmHost {
    Ready(String),
    AllocationError,
    NoSessionAvailable,
}

impl VmHost {
    /// First line of the file; None while it is still empty.
    pub fn parse(content: &str) -> Option<Self> {
        let host = content.lines().next()?.trim();
        match host {
            "" => None,
            VM_ALLOCATION_ERROR => Some(VmHost::AllocationError),
            VM_NO_SESSION => Some(VmHost::NoSessionAvailable),
            host => Some(VmHost::Ready(host.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_detects_public_url_once() {
        let mut watcher = UrlWatcher::new();
        let mut output = lines(&[
            "[I 10:01:02.123 LabApp] Jupyter Server 2.7.0 is running at:",
            "    http://127.0.0.1:8891/lab?token=abcd1234",
        ]);
        assert_eq!(watcher.feed(&output), None);

        output.push("    http://cn05:8891/lab?token=abcd1234".to_string());
        let url = watcher.feed(&output).unwrap();
        assert_eq!(url.url, "http://cn05:8891/lab?token=abcd1234");
        assert_eq!(url.host, "cn05");
        assert_eq!(url.port, Some(8891));

        output.push("    http://cn05:8891/lab?token=abcd1234".to_string());
        assert_eq!(watcher.feed(&output), None);
        assert_eq!(watcher.found().map(|u| u.port), Some(Some(8891)));
    }

    #[test]
    fn test_loopback_only_never_fires() {
        let mut watcher = UrlWatcher::new();
        let output = lines(&["    http://127.0.0.1:8888/lab?token=ffff"]);
        assert_eq!(watcher.feed(&output), None);
        assert_eq!(watcher.feed(&output), None);
        assert!(watcher.found().is_none());
    }

    #[test]
    fn test_url_without_token_ignored() {
        assert_eq!(detect_notebook_url("see http://cn05:8888/lab"), None);
        let url = detect_notebook_url("or http://hostname:8888/?token=x1").unwrap();
        assert_eq!(url.host, "hostname");
        assert_eq!(url.port, Some(8888));
    }

    #[test]
    fn test_rewrite_to_local_port() {
        let url = NotebookUrl::parse("http://localhost:8888/tree?token=abc").unwrap();
        assert_eq!(
            url.through_local_port(40123),
            "http://localhost:40123/tree?token=abc"
        );
        let url = NotebookUrl::parse("http://cn05:8888?token=abc").unwrap();
        assert_eq!(
            url.through_local_port(5000),
            "http://localhost:5000?token=abc"
        );
    }

    #[test]
    fn test_vm_host_sentinels() {
        assert_eq!(VmHost::parse("0.0.0.1\n"), Some(VmHost::NoSessionAvailable));
        assert_eq!(VmHost::parse("0.0.0.0\n"), Some(VmHost::AllocationError));
        assert_eq!(
            VmHost::parse("win10-vm07.lunarc.lu.se\n"),
            Some(VmHost::Ready("win10-vm07.lunarc.lu.se".to_string()))
        );
        assert_eq!(VmHost::parse(""), None);
        assert_eq!(VmHost::parse("\n"), None);
    }
}
