use std::mem;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::WWW_AUTHENTICATE;
use http::{Request, Response};
use tower::{Layer, Service};

use super::{negotiate_header, FallbackAuth, GateDecision, NegotiateConnection, NegotiateGate};

/// [tower] middleware putting a [NegotiateGate] in front of a service.
///
/// Requests are expected to carry a [NegotiateConnection] extension. Authenticated requests reach
/// the inner service with an [Identity](crate::Identity) extension; rejected and challenged
/// requests never do.
#[derive(Debug, Clone)]
pub struct NegotiateLayer {
    gate: Arc<NegotiateGate>,
}

impl NegotiateLayer {
    pub fn new(gate: NegotiateGate) -> Self {
        Self { gate: Arc::new(gate) }
    }

    pub fn gate(&self) -> &NegotiateGate {
        &self.gate
    }
}

impl<S> Layer<S> for NegotiateLayer {
    type Service = NegotiateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        NegotiateService {
            inner,
            gate: Arc::clone(&self.gate),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NegotiateService<S> {
    inner: S,
    gate: Arc<NegotiateGate>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for NegotiateService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let connection = request.extensions().get::<NegotiateConnection>().cloned();
        if connection.is_none() {
            debug!(uri = %request.uri(), "Request without NegotiateConnection, using a per-request session");
        }

        let decision = self.gate.evaluate(connection.as_ref(), request.headers());

        let final_header = match decision {
            GateDecision::Authenticated {
                identity,
                output_token,
            } => {
                request.extensions_mut().insert(identity);

                output_token.and_then(|token| negotiate_header(Some(&token)))
            }
            GateDecision::Fallback { scheme } => {
                request.extensions_mut().insert(FallbackAuth { scheme });

                None
            }
            GateDecision::Challenge { output_token } => {
                let response = self.gate.challenge(output_token.as_deref());

                return Box::pin(async move { Ok(response) });
            }
            GateDecision::Rejected(reason) => {
                let response = self.gate.rejection(&reason);

                return Box::pin(async move { Ok(response) });
            }
        };

        // The clone has not been driven to readiness, keep the one that has.
        let clone = self.inner.clone();
        let mut inner = mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut response = inner.call(request).await?;

            if let Some(value) = final_header {
                response.headers_mut().append(WWW_AUTHENTICATE, value);
            }

            Ok(response)
        })
    }
}
