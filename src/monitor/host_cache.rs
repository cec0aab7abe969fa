use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Mutex;

/// ip=hostname cache. Entries from the cache file win, lazily resolved
/// reverse-DNS entries fill in behind them, and anything unresolvable maps to
/// itself so we only probe DNS once per address.
pub struct HostCache {
    from_file: HashMap<String, String>,
    resolved: Mutex<HashMap<String, String>>,
}

/// Parses a host-cache file: one `ip=hostname` per line, blank lines ignored.
pub fn load_host_cache_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut entries = HashMap::new();
    if !path.exists() {
        return Ok(entries);
    }

    let content = fs::read_to_string(path)?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (host, hostname) = line.split_once('=').ok_or_else(|| {
            anyhow!(
                "Host cache entry '{}' is not properly formatted! Format: ip=hostname",
                line
            )
        })?;
        let host = host.trim();
        let hostname = hostname.trim();
        if host.is_empty() || hostname.is_empty() {
            return Err(anyhow!(
                "Host cache entry '{}' is not properly formatted! Format: ip=hostname",
                line
            ));
        }

        entries.insert(host.to_string(), hostname.to_string());
    }
    return Ok(entries);
}

#[cfg(unix)]
fn reverse_dns(ip: IpAddr) -> Option<String> {
    use std::net::SocketAddr;

    let addr = SocketAddr::new(ip, 0);
    let mut host = [0u8; libc::NI_MAXHOST as usize];

    let (storage, len) = match addr {
        SocketAddr::V4(v4) => {
            let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in>(),
                );
            }
            (storage, std::mem::size_of::<libc::sockaddr_in>())
        }
        SocketAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin6 as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in6>(),
                );
            }
            (storage, std::mem::size_of::<libc::sockaddr_in6>())
        }
    };

    let rc = unsafe {
        libc::getnameinfo(
            &storage as *const _ as *const libc::sockaddr,
            len as libc::socklen_t,
            host.as_mut_ptr() as *mut libc::c_char,
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        return None;
    }

    let end = host.iter().position(|&b| b == 0)?;
    return String::from_utf8(host[..end].to_vec()).ok();
}

#[cfg(not(unix))]
fn reverse_dns(_ip: IpAddr) -> Option<String> {
    return None;
}

impl HostCache {
    pub fn new(from_file: HashMap<String, String>) -> Self {
        return Self {
            from_file,
            resolved: Mutex::new(HashMap::new()),
        };
    }

    /// Resolves an address to a display hostname. Non-IP inputs (already a
    /// hostname, socket paths) come back unchanged.
    pub fn hostname(&self, host: &str) -> String {
        if let Some(hostname) = self.from_file.get(host) {
            return hostname.clone();
        }

        if let Some(hostname) = self.resolved.lock().unwrap().get(host) {
            return hostname.clone();
        }

        let resolved = match host.parse::<IpAddr>() {
            Ok(ip) => reverse_dns(ip).unwrap_or_else(|| host.to_string()),
            Err(_) => host.to_string(),
        };
        self.resolved
            .lock()
            .unwrap()
            .insert(host.to_string(), resolved.clone());
        return resolved;
    }

    /// Writes back everything learned this session, merged with the file's
    /// original entries.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let resolved = self.resolved.lock().unwrap();
        let mut lines: Vec<String> = self
            .from_file
            .iter()
            .chain(resolved.iter().filter(|(host, name)| host != name))
            .map(|(host, name)| format!("{}={}", host, name))
            .collect();
        lines.sort();
        lines.dedup();
        fs::write(path, lines.join("\n") + "\n")?;
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_load_host_cache_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.0.0.1=db1.example.com").unwrap();
        writeln!(file, "10.0.0.2 = db2.example.com").unwrap();
        writeln!(file).unwrap();

        let entries = load_host_cache_file(file.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.get("10.0.0.1").unwrap(), "db1.example.com");
        assert_eq!(entries.get("10.0.0.2").unwrap(), "db2.example.com");
    }

    #[test]
    fn test_load_host_cache_file_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not-a-pair").unwrap();
        assert!(load_host_cache_file(file.path()).is_err());
    }

    #[test]
    fn test_load_host_cache_missing_file() {
        let entries = load_host_cache_file(Path::new("/nonexistent/host_cache")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_file_entries_win() {
        let mut from_file = HashMap::new();
        from_file.insert("10.1.2.3".to_string(), "primary.internal".to_string());
        let cache = HostCache::new(from_file);

        assert_eq!(cache.hostname("10.1.2.3"), "primary.internal");
    }

    #[test]
    fn test_non_ip_passthrough() {
        let cache = HostCache::new(HashMap::new());
        assert_eq!(cache.hostname("db.example.com"), "db.example.com");
    }

    #[test]
    fn test_persist_round_trip() {
        let mut from_file = HashMap::new();
        from_file.insert("10.1.2.3".to_string(), "primary.internal".to_string());
        let cache = HostCache::new(from_file);

        let file = tempfile::NamedTempFile::new().unwrap();
        cache.persist(file.path()).unwrap();

        let reloaded = load_host_cache_file(file.path()).unwrap();
        assert_eq!(reloaded.get("10.1.2.3").unwrap(), "primary.internal");
    }
}
