//! 远端端点：连接池按端点划分连接。

use std::fmt;

use http::uri::{Authority, PathAndQuery, Scheme as UriScheme, Uri};

/// [`Endpoint`] 的 URI scheme。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scheme {
    /// 明文 HTTP/2（prior knowledge，不经过 HTTP/1 升级）
    Http,
    /// 基于 TLS 的 HTTP/2
    Https,
}

impl Scheme {
    /// 该 scheme 的默认端口。
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    /// 该 scheme 在 URI 中的写法。
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// 远端的 `(scheme, host, port)` 三元组，每个端点拥有独立的一组连接。
///
/// 只有端点相等的两个请求才会共享连接。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    scheme: Scheme,
    host: Box<str>,
    port: u16,
}

impl Endpoint {
    /// 创建端点。host 为空或端口为 0 时返回用户错误。
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> crate::Result<Endpoint> {
        let host = host.into();
        if host.is_empty() {
            return Err(crate::Error::new_user_endpoint("empty host"));
        }
        if port == 0 {
            return Err(crate::Error::new_user_endpoint("port 0"));
        }
        Ok(Endpoint {
            scheme,
            host: host.into_boxed_str(),
            port,
        })
    }

    /// 从绝对 URI 推导出它指向的端点。
    ///
    /// 缺少 scheme 时按 `http` 处理，缺少端口时使用 scheme 的默认端口。
    pub fn from_uri(uri: &Uri) -> crate::Result<Endpoint> {
        let scheme = match uri.scheme_str() {
            None | Some("http") => Scheme::Http,
            Some("https") => Scheme::Https,
            Some(_other) => return Err(crate::Error::new_user_endpoint("unsupported scheme")),
        };
        let host = uri
            .host()
            .ok_or_else(|| crate::Error::new_user_endpoint("uri has no host"))?;
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());
        Endpoint::new(scheme, host, port)
    }

    /// 端点的 scheme。
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// 端点的主机名或地址字面量。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端点的端口。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 为只带路径的请求目标补上 scheme 和 authority。
    ///
    /// HTTP/2 要求 `:scheme` 和 `:authority` 两个伪头部都存在；
    /// 已经是绝对 URI 的原样返回。
    pub(crate) fn absolute_uri(&self, uri: &Uri) -> crate::Result<Uri> {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Ok(uri.clone());
        }
        let authority: Authority = self
            .to_string()
            .parse()
            .map_err(crate::Error::new_user_endpoint)?;
        let path = uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        let scheme = match self.scheme {
            Scheme::Http => UriScheme::HTTP,
            Scheme::Https => UriScheme::HTTPS,
        };
        Uri::builder()
            .scheme(scheme)
            .authority(authority)
            .path_and_query(path)
            .build()
            .map_err(crate::Error::new_user_endpoint)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // IPv6 字面量保留方括号，输出才能作为 authority 解析
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_host_and_zero_port() {
        assert!(Endpoint::new(Scheme::Http, "", 8080).unwrap_err().is_user());
        assert!(Endpoint::new(Scheme::Http, "localhost", 0)
            .unwrap_err()
            .is_user());
    }

    #[test]
    fn from_uri_defaults() {
        let ep = Endpoint::from_uri(&"http://localhost/nnrf-nfm/v1".parse().unwrap()).unwrap();
        assert_eq!(ep.scheme(), Scheme::Http);
        assert_eq!(ep.port(), 80);
        assert_eq!(ep.to_string(), "localhost:80");

        let ep = Endpoint::from_uri(&"https://example.com:8443/".parse().unwrap()).unwrap();
        assert_eq!(ep.scheme(), Scheme::Https);
        assert_eq!(ep.port(), 8443);
    }

    #[test]
    fn from_uri_rejects_relative_and_foreign_schemes() {
        assert!(Endpoint::from_uri(&"/just/a/path".parse().unwrap()).is_err());
        assert!(Endpoint::from_uri(&"ftp://example.com/".parse().unwrap()).is_err());
    }

    #[test]
    fn absolute_uri_fills_scheme_and_authority() {
        let ep = Endpoint::new(Scheme::Http, "localhost", 8080).unwrap();
        let uri = ep.absolute_uri(&"/nnrf-nfm/v1?x=1".parse().unwrap()).unwrap();
        assert_eq!(uri, "http://localhost:8080/nnrf-nfm/v1?x=1");

        let already: Uri = "http://other:1/a".parse().unwrap();
        assert_eq!(ep.absolute_uri(&already).unwrap(), already);
    }

    #[test]
    fn display_brackets_ipv6() {
        let ep = Endpoint::new(Scheme::Http, "::1", 8080).unwrap();
        assert_eq!(ep.to_string(), "[::1]:8080");
    }
}
