// Copyright 2025 Netgauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client address lookup.

use netgauge_core::ClientAddress;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SampleError;
use crate::transport::Transport;

/// Resolve the client's public address from a `{"ip": "..."}` endpoint.
///
/// Every failure yields [`ClientAddress::Unavailable`]; only cancellation is
/// returned as an error.
pub async fn resolve_client_address(
    transport: &dyn Transport,
    url: &str,
    cancel: &CancellationToken,
) -> Result<ClientAddress, SampleError> {
    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SampleError::Cancelled),
        body = transport.get_json(url) => body,
    };

    let address = match body {
        Ok(value) => match value.get("ip").and_then(|ip| ip.as_str()).map(str::trim) {
            Some(ip) if !ip.is_empty() => ClientAddress::Known(ip.to_string()),
            _ => {
                warn!(url, "Identity response carried no ip field");
                ClientAddress::Unavailable
            }
        },
        Err(e) => {
            warn!(url, error = %e, "Client address lookup failed");
            ClientAddress::Unavailable
        }
    };
    debug!(address = %address, "Resolved client address");
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::MockTransport;
    use serde_json::json;

    const URL: &str = "https://ip.test/?format=json";

    #[tokio::test]
    async fn test_known_address() {
        let mut transport = MockTransport::new();
        transport
            .expect_get_json()
            .withf(|url| url.starts_with("https://ip.test/"))
            .times(1)
            .returning(|_| Ok(json!({"ip": "198.51.100.7"})));

        let address = resolve_client_address(&transport, URL, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(address, ClientAddress::Known("198.51.100.7".to_string()));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_unavailable() {
        let mut transport = MockTransport::new();
        transport
            .expect_get_json()
            .returning(|_| Err(TransportError::Request("dns".to_string())));

        let address = resolve_client_address(&transport, URL, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(address, ClientAddress::Unavailable);
    }

    #[tokio::test]
    async fn test_missing_field_is_unavailable() {
        let mut transport = MockTransport::new();
        transport
            .expect_get_json()
            .returning(|_| Ok(json!({"address": "198.51.100.7"})));

        let address = resolve_client_address(&transport, URL, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(address, ClientAddress::Unavailable);
    }

    #[tokio::test]
    async fn test_cancelled_lookup() {
        let mut transport = MockTransport::new();
        transport.expect_get_json().returning(|_| Ok(json!({"ip": "x"})));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = resolve_client_address(&transport, URL, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SampleError::Cancelled));
    }
}
