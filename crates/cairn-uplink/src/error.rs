use miette::Diagnostic;
use thiserror::Error;

/// Error type returned by [`crate::Uplink`] calls.
///
/// [`UplinkError::is_timeout_class`] distinguishes the transient,
/// publish-gate/escalation-relevant failures (§4.2, GLOSSARY
/// "timeout-class error") from everything else.
#[derive(Debug, Error, Diagnostic)]
pub enum UplinkError {
    /// The upstream request itself failed (connection, TLS, timeout, or a
    /// middleware-level error such as exhausted retries).
    #[error(transparent)]
    #[diagnostic(code(cairn_uplink::request))]
    Request(#[from] reqwest_middleware::Error),

    /// The upstream responded, but not with 2xx or 304.
    #[error("uplink `{upname}` responded with unexpected status {status} for `{path}`")]
    #[diagnostic(code(cairn_uplink::bad_status))]
    BadStatus {
        upname: String,
        path: String,
        status: u16,
    },

    /// The response body wasn't well-formed JSON.
    #[error("uplink `{upname}` returned malformed JSON for `{path}`: {source}")]
    #[diagnostic(code(cairn_uplink::malformed_json))]
    MalformedJson {
        upname: String,
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(cairn_uplink::bad_url))]
    UrlParse(#[from] url::ParseError),
}

impl UplinkError {
    /// True for `ETIMEDOUT`, `ESOCKETTIMEDOUT`, and `ECONNRESET`-class
    /// failures (GLOSSARY). These are the only failures the publish-gate
    /// (§4.3) and freshness escalation (§4.4 step 3, P4) treat as
    /// survivable.
    pub fn is_timeout_class(&self) -> bool {
        match self {
            UplinkError::Request(reqwest_middleware::Error::Reqwest(e)) => {
                e.is_timeout() || e.is_connect() || is_connection_reset(e)
            }
            UplinkError::Request(reqwest_middleware::Error::Middleware(_)) => false,
            _ => false,
        }
    }
}

/// Walks a [`reqwest::Error`]'s source chain for an `io::Error` carrying
/// `ConnectionReset` — the mid-request ECONNRESET case `is_connect()` never
/// catches, since that only covers failures during connection establishment.
fn is_connection_reset(e: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        source = err.source();
    }
    false
}

pub type Result<T> = std::result::Result<T, UplinkError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{Uplink, UplinkConfig};

    #[async_std::test]
    async fn econnreset_mid_request_is_timeout_class() {
        let listener = async_std::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        async_std::task::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                // Let the client finish its TCP/TLS-less handshake and start
                // writing its request, then drop without ever reading it:
                // the kernel discards the still-unread bytes by sending an
                // RST instead of a clean FIN, the same shape of failure as
                // an upstream resetting mid-response.
                async_std::task::sleep(Duration::from_millis(20)).await;
                drop(stream);
            }
        });

        let base_url: url::Url = format!("http://{addr}").parse().unwrap();
        let up = Uplink::new(
            UplinkConfig::new("flaky", base_url)
                .fetch_retries(0)
                .timeout(Duration::from_secs(2)),
        );

        let err = up.get_remote_metadata("left-pad", None).await.unwrap_err();
        assert!(err.is_timeout_class(), "ECONNRESET mid-request must be timeout-class, got: {err}");
    }
}
