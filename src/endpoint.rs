use crate::error::{Error, Result};

const DEFAULT_TLS_PORT: u16 = 443;

/// A KMS endpoint in host-and-port form.
///
/// Accepts `host` or `host:port`, optionally prefixed with `https://`.
/// Any other scheme, an empty host, a bad port, or a trailing path is
/// rejected. The original spelling (minus the scheme) is preserved so that
/// serialization round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: Option<u16>,
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Endpoint> {
        let mut rest = s.trim();
        if let Some(stripped) = rest.strip_prefix("https://") {
            rest = stripped;
        } else if rest.contains("://") {
            return Err(Error::client(format!(
                "endpoint \"{s}\" must use HTTPS"
            )));
        }
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.contains('/') {
            return Err(Error::client(format!(
                "unexpected path in endpoint \"{s}\""
            )));
        }
        let (host, port) = match rest.split_once(':') {
            Some((h, p)) => {
                let port: u16 = p.parse().map_err(|_| {
                    Error::client(format!("invalid port in endpoint \"{s}\""))
                })?;
                (h, Some(port))
            }
            None => (rest, None),
        };
        if host.is_empty() {
            return Err(Error::client(format!("invalid endpoint \"{s}\"")));
        }
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the host must connect to (TLS default when unspecified).
    pub fn connect_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_TLS_PORT)
    }

    /// Original host-and-port spelling, used for serialization.
    pub fn host_and_port(&self) -> String {
        match self.port {
            Some(p) => format!("{}:{}", self.host, p),
            None => self.host.clone(),
        }
    }

    /// Target for the host's socket code, always carrying a port.
    pub fn connect_target(&self) -> String {
        format!("{}:{}", self.host, self.connect_port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_host() {
        let e = Endpoint::parse("kms.us-east-1.amazonaws.com").unwrap();
        assert_eq!(e.host(), "kms.us-east-1.amazonaws.com");
        assert_eq!(e.connect_port(), 443);
        assert_eq!(e.host_and_port(), "kms.us-east-1.amazonaws.com");
        assert_eq!(e.connect_target(), "kms.us-east-1.amazonaws.com:443");
    }

    #[test]
    fn parses_host_with_port_and_scheme() {
        let e = Endpoint::parse("https://example.vault.azure.net:8443/").unwrap();
        assert_eq!(e.host_and_port(), "example.vault.azure.net:8443");
        assert_eq!(e.connect_port(), 8443);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Endpoint::parse("http://plain.example.com").is_err());
        assert!(Endpoint::parse("host.example.com:notaport").is_err());
        assert!(Endpoint::parse("host.example.com/v1/keys").is_err());
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse(":443").is_err());
    }
}
