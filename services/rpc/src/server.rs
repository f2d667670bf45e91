//! HTTP binding for the RPC surface
//!
//! A single POST endpoint accepts the JSON envelope and dispatches on
//! `{service, method}`; `streamPrices` answers with a newline-delimited
//! JSON body that ends on abort or idle timeout. GET health endpoints are
//! kept for probes that cannot speak the envelope.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info};

use pv_streams::{RateLimitDecision, SlidingWindowLimiter};
use pv_types::CoreError;

use crate::charts::ChartsService;
use crate::envelope::{RpcRequest, RpcResponse, ENVELOPE_VERSION};
use crate::health::HealthService;
use crate::prices::PricesService;
use crate::stream::{PriceBroadcaster, PriceStream};
use crate::validation::parse_pairs;

const PRICES_SERVICE: &str = "PricesService@2.0.0";
const CHARTS_SERVICE: &str = "ChartsService@2.0.0";
const HEALTH_SERVICE: &str = "HealthService@1.0.0";

/// Shared handler context.
pub struct RpcContext {
    pub prices: PricesService,
    pub charts: ChartsService,
    pub health: HealthService,
    pub broadcaster: Arc<PriceBroadcaster>,
    /// `None` disables request limiting
    pub limiter: Option<SlidingWindowLimiter>,
}

/// The RPC HTTP server.
pub struct RpcServer {
    context: Arc<RpcContext>,
    addr: SocketAddr,
}

impl RpcServer {
    pub fn new(context: RpcContext, addr: SocketAddr) -> Self {
        Self {
            context: Arc::new(context),
            addr,
        }
    }

    /// Serve until the stop signal fires.
    pub async fn serve(&self, mut stop_rx: watch::Receiver<bool>) -> Result<(), CoreError> {
        let context = Arc::clone(&self.context);

        let make_svc = make_service_fn(move |conn: &hyper::server::conn::AddrStream| {
            let context = Arc::clone(&context);
            let client_ip = conn.remote_addr().ip().to_string();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_request(req, Arc::clone(&context), client_ip.clone())
                }))
            }
        });

        let server = Server::bind(&self.addr)
            .serve(make_svc)
            .with_graceful_shutdown(async move {
                // Wait for the stop signal; a closed channel also stops us.
                while stop_rx.changed().await.is_ok() {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            });

        info!(addr = %self.addr, "rpc server listening");
        server.await.map_err(|err| {
            error!(%err, "rpc server error");
            CoreError::Internal {
                detail: err.to_string(),
            }
        })
    }
}

async fn handle_request(
    req: Request<Body>,
    context: Arc<RpcContext>,
    client_ip: String,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = if method == Method::POST && (path == "/" || path == "/rpc") {
        handle_envelope(req, context, client_ip).await
    } else if method == Method::GET && path == "/health" {
        json_response(
            StatusCode::OK,
            context
                .health
                .check()
                .await
                .unwrap_or_else(|_| json!({"status": "unhealthy"})),
        )
    } else if method == Method::GET && path == "/ready" {
        json_response(StatusCode::OK, context.health.ready().await)
    } else if method == Method::GET && path == "/live" {
        json_response(StatusCode::OK, context.health.live())
    } else {
        json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" }))
    };
    Ok(response)
}

async fn handle_envelope(
    req: Request<Body>,
    context: Arc<RpcContext>,
    client_ip: String,
) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(err) => {
            return envelope_error(
                "unknown",
                &CoreError::InvalidParams {
                    detail: format!("unreadable request body: {err}"),
                },
            );
        }
    };

    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return envelope_error(
                "unknown",
                &CoreError::InvalidParams {
                    detail: format!("malformed envelope: {err}"),
                },
            );
        }
    };

    if request.version != ENVELOPE_VERSION {
        return envelope_error(
            &request.id,
            &CoreError::InvalidParams {
                detail: format!("unsupported envelope version: {}", request.version),
            },
        );
    }

    if let Some(limiter) = &context.limiter {
        let decision = limiter.check(&client_ip, Some(&request.method)).await;
        if !decision.allowed {
            return rate_limited_response(&decision);
        }
    }

    debug!(service = %request.service, method = %request.method, id = %request.id, "rpc call");

    // streamPrices cannot fit the unary reply shape; it answers with a
    // newline-delimited JSON body instead.
    if request.service == PRICES_SERVICE && request.method == "streamPrices" {
        return match parse_pairs(&request.input) {
            Ok(pairs) => {
                let (_abort_tx, abort_rx) = watch::channel(false);
                let stream = context.broadcaster.subscribe(pairs, abort_rx);
                streaming_response(stream)
            }
            Err(err) => envelope_error(&request.id, &err),
        };
    }

    let result = dispatch(&request, &context).await;
    let response = match result {
        Ok(data) => RpcResponse::success(&request.id, data),
        Err(err) => RpcResponse::failure(&request.id, &err),
    };
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    json_response(status, serde_json::to_value(&response).unwrap_or_default())
}

async fn dispatch(
    request: &RpcRequest,
    context: &RpcContext,
) -> Result<serde_json::Value, CoreError> {
    match (request.service.as_str(), request.method.as_str()) {
        (PRICES_SERVICE, "getPrice") => context.prices.get_price(&request.input).await,
        (PRICES_SERVICE, "getMultiplePrices") => {
            context.prices.get_multiple_prices(&request.input).await
        }
        (PRICES_SERVICE, "getPriceChange") => {
            context.prices.get_price_change(&request.input).await
        }
        (CHARTS_SERVICE, "getChartData") => context.charts.get_chart_data(&request.input).await,
        (CHARTS_SERVICE, "getOHLCV") => context.charts.get_ohlcv(&request.input).await,
        (HEALTH_SERVICE, "check") => context.health.check().await,
        (HEALTH_SERVICE, "live") => Ok(context.health.live()),
        (HEALTH_SERVICE, "ready") => Ok(context.health.ready().await),
        (service, method) => Err(CoreError::InvalidParams {
            detail: format!("unknown method {service}/{method}"),
        }),
    }
}

/// Newline-delimited JSON price stream; a terminal error is emitted as a
/// final line with its code before the body ends.
fn streaming_response(stream: PriceStream) -> Response<Body> {
    enum StreamState {
        Live(Box<PriceStream>),
        Done,
    }

    let body_stream = futures_util::stream::unfold(
        StreamState::Live(Box::new(stream)),
        |state| async move {
            match state {
                StreamState::Done => None,
                StreamState::Live(mut stream) => match stream.next().await {
                    Ok(payload) => {
                        let line = serde_json::to_string(&payload)
                            .map(|s| s + "\n")
                            .unwrap_or_default();
                        Some((
                            Ok::<_, Infallible>(Bytes::from(line)),
                            StreamState::Live(stream),
                        ))
                    }
                    Err(err) => {
                        let (code, message) = err.public_parts();
                        let line = json!({
                            "error": { "code": code.as_str(), "message": message }
                        })
                        .to_string()
                            + "\n";
                        Some((Ok(Bytes::from(line)), StreamState::Done))
                    }
                },
            }
        },
    );

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/x-ndjson")
        .body(Body::wrap_stream(body_stream))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn rate_limited_response(decision: &RateLimitDecision) -> Response<Body> {
    json_response(
        StatusCode::TOO_MANY_REQUESTS,
        json!({
            "allowed": false,
            "remaining": decision.remaining,
            "resetTime": decision.reset_time_ms,
            "retryAfter": decision.retry_after_ms,
        }),
    )
}

fn envelope_error(id: &str, err: &CoreError) -> Response<Body> {
    let response = RpcResponse::failure(id, err);
    json_response(
        StatusCode::BAD_REQUEST,
        serde_json::to_value(&response).unwrap_or_default(),
    )
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
