/// An absolute http(s) URL a subscription delivers to. Must be instantiated
/// with `TargetUrl::parse`; the original string is kept verbatim so the
/// outbound request hits exactly what the operator registered.
#[derive(Debug, Clone)]
pub struct TargetUrl(String);

impl TargetUrl {
    pub fn parse(value: String) -> Result<Self, String> {
        let parsed = url::Url::parse(&value)
            .map_err(|_| format!("Invalid target URL: {value:?}"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!(
                "Target URL must use http or https, got {:?}",
                parsed.scheme()
            ));
        }
        if parsed.host_str().is_none() {
            return Err(format!("Target URL has no host: {value:?}"));
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for TargetUrl {
    fn as_ref(&self) -> &str { &self.0 }
}
