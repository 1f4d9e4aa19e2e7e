//! Service name normalisation
//!
//! Probe corpora and services tables spell the same service several ways
//! (`ms-wbt-server`, `ssl/http`, `www`). Everything the engine emits goes
//! through [`fix_protocol`] so that downstream alias lookups see one name.

const ALIASES: &[(&str, &str)] = &[
    ("ssl/http", "https"),
    ("http-proxy", "http"),
    ("ms-wbt-server", "rdp"),
    ("microsoft-ds", "smb"),
    ("netbios-ssn", "netbios"),
    ("oracle-tns", "oracle"),
    ("msrpc", "rpc"),
    ("ms-sql-s", "mssql"),
    ("domain", "dns"),
    ("svnserve", "svn"),
    ("ibm-db2", "db2"),
    ("socks-proxy", "socks5"),
];

/// Canonical service name. Idempotent.
pub fn fix_protocol(name: &str) -> String {
    let name = name.replace('_', "-");
    if let Some((_, to)) = ALIASES.iter().find(|(from, _)| *from == name) {
        return (*to).to_string();
    }
    if name.len() > 4 {
        if let Some(inner) = name.strip_prefix("ssl/") {
            return format!("{}-ssl", fix_protocol(inner));
        }
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("S{}", name);
    }
    name
}

/// Normalisation applied to `nmap-services` entries before they are used for
/// guessing.
pub fn fix_service_name(name: &str) -> String {
    let name = name.to_lowercase();
    match name.as_str() {
        "" => "unknown".to_string(),
        "www" | "www-http" => "http".to_string(),
        "https" | "http-ssl" => "https".to_string(),
        "domain" | "nameserver" => "dns".to_string(),
        _ => name.replace('_', "-"),
    }
}
