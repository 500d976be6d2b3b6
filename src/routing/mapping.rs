//! Where a route sends its traffic.

use std::sync::Arc;

use axum::response::Response;
use url::Url;

use crate::load_balancer::RoundRobinBalancer;
use crate::routing::upstream::{OutboundRequest, UpstreamClient, UpstreamError};

/// Destination of a route: one fixed backend, or a balanced set.
#[derive(Debug, Clone)]
pub enum Mapping {
    Single(Url),
    Balanced(Arc<RoundRobinBalancer>),
}

impl Mapping {
    /// Forward a buffered request. For a balanced mapping, transport failures
    /// fail over to the next backend. Any other error is returned without
    /// touching the backend's state; HTTP statuses are returned as-is.
    pub async fn forward(
        &self,
        client: &UpstreamClient,
        prefix: &str,
        request: &OutboundRequest,
    ) -> Result<Response, UpstreamError> {
        match self {
            Mapping::Single(target) => client.send(target, prefix, request).await,
            Mapping::Balanced(balancer) => balancer
                .make_request(move |target| async move {
                    match client.send(&target, prefix, request).await {
                        Err(e) if !e.is_transport() => Ok(Err(e)),
                        sent => sent.map(Ok),
                    }
                })
                .await?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use bytes::Bytes;
    use std::time::Duration;

    fn outbound(uri: &str) -> OutboundRequest {
        let (parts, _) = Request::builder().uri(uri).body(()).unwrap().into_parts();
        OutboundRequest {
            parts,
            body: Bytes::new(),
        }
    }

    fn balanced(url: &str) -> (Mapping, Arc<RoundRobinBalancer>) {
        let balancer = Arc::new(RoundRobinBalancer::new(vec![Url::parse(url).unwrap()]));
        (Mapping::Balanced(balancer.clone()), balancer)
    }

    #[tokio::test]
    async fn test_request_side_error_keeps_backend_active() {
        // No host to send to: the URI cannot be built.
        let (mapping, balancer) = balanced("data:text/plain,hello");
        let client = UpstreamClient::new(Duration::from_secs(1));

        let err = mapping.forward(&client, "/", &outbound("/x")).await.unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidUri(_)));
        assert!(balancer.targets()[0].is_active());
    }

    #[tokio::test]
    async fn test_transport_error_marks_backend_inactive() {
        let (mapping, balancer) = balanced("http://127.0.0.1:1/");
        let client = UpstreamClient::new(Duration::from_secs(1));

        let err = mapping.forward(&client, "/", &outbound("/x")).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Balancer(_)));
        assert!(!balancer.targets()[0].is_active());
    }
}
