//! The HTTP layer: routes SCEP operations to the [`Service`] and runs the
//! server until it receives a termination signal.
use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{
    FutureExt as _,
    future::{self, Either},
    pin_mut, select,
};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use strum::Display;
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::{
    constants::SCEP_PATH,
    options::ServerOptions,
    service::{self, Service},
};

const CA_CERT_CONTENT_TYPE: &str = "application/x-x509-ca-cert";
const USER_CERT_CONTENT_TYPE: &str = "application/x-x509-user-cert";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to bind TCP listener to {socket_addr}"))]
    BindTcpListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },

    #[snafu(display("failed to run HTTP server"))]
    RunServer { source: std::io::Error },

    #[snafu(display("failed to register the {signal} handler"))]
    RegisterSignalHandler {
        source: std::io::Error,
        signal: &'static str,
    },
}

/// The SCEP operations, as named in the `operation` query parameter.
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Eq)]
pub enum Operation {
    #[serde(rename = "GetCACaps")]
    #[strum(serialize = "GetCACaps")]
    GetCaCaps,

    #[serde(rename = "GetCACert")]
    #[strum(serialize = "GetCACert")]
    GetCaCert,

    #[serde(rename = "PKIOperation")]
    #[strum(serialize = "PKIOperation")]
    PkiOperation,
}

#[derive(Debug, Deserialize)]
struct OperationQuery {
    operation: Operation,
}

/// Builds the router serving the SCEP operations under [`SCEP_PATH`] and a
/// `/health` route.
pub fn router(service: Arc<Service>) -> Router {
    let service_builder = ServiceBuilder::new().layer(TraceLayer::new_for_http());

    Router::new()
        .route(SCEP_PATH, get(handle_get).post(handle_post))
        .layer(service_builder)
        // The health route is below the TraceLayer so as not to be instrumented
        .route("/health", get(|| async { "ok" }))
        .with_state(service)
}

async fn handle_get(
    State(service): State<Arc<Service>>,
    Query(query): Query<OperationQuery>,
) -> Response {
    match query.operation {
        Operation::GetCaCaps => service.get_ca_caps().into_response(),
        Operation::GetCaCert => match service.get_ca_cert() {
            Ok(der) => ([(CONTENT_TYPE, CA_CERT_CONTENT_TYPE)], der).into_response(),
            Err(err) => ServiceError(err).into_response(),
        },
        operation @ Operation::PkiOperation => unsupported(operation),
    }
}

async fn handle_post(
    State(service): State<Arc<Service>>,
    Query(query): Query<OperationQuery>,
    body: Bytes,
) -> Response {
    match query.operation {
        Operation::PkiOperation => match service.pki_operation(&body).await {
            Ok(der) => ([(CONTENT_TYPE, USER_CERT_CONTENT_TYPE)], der).into_response(),
            Err(err) => ServiceError(err).into_response(),
        },
        operation => unsupported(operation),
    }
}

fn unsupported(operation: Operation) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        format!("{operation} is not supported with this method"),
    )
        .into_response()
}

/// Maps [`service::Error`]s to responses, client errors answer `400` or
/// `403`, everything else `500`.
struct ServiceError(service::Error);

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            service::Error::ParseRequest { .. } => StatusCode::BAD_REQUEST,
            err if err.is_client_error() => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = &err as &dyn std::error::Error, "failed to handle request");
        } else {
            warn!(error = &err as &dyn std::error::Error, "refused request");
        }

        (status, err.to_string()).into_response()
    }
}

/// A ready-to-use SCEP server.
///
/// TLS termination is left to a reverse proxy in front of it.
pub struct ScepServer {
    router: Router,
    options: ServerOptions,
}

impl ScepServer {
    pub fn new(service: Service, options: ServerOptions) -> Self {
        debug!("create SCEP router");
        let router = router(Arc::new(service));

        Self { router, options }
    }

    /// Runs the server and sets up signal handlers for shutting down.
    ///
    /// This does not implement graceful shutdown, in-flight requests are
    /// dropped.
    pub async fn run(self) -> Result<()> {
        let future_server = self.run_server();
        let future_signal = async {
            let mut sigint = signal(SignalKind::interrupt())
                .context(RegisterSignalHandlerSnafu { signal: "SIGINT" })?;
            let mut sigterm = signal(SignalKind::terminate())
                .context(RegisterSignalHandlerSnafu { signal: "SIGTERM" })?;

            debug!("created unix signal handlers");

            select! {
                signal = sigint.recv().fuse() => {
                    if signal.is_some() {
                        info!("received SIGINT, shutting down");
                    }
                },
                signal = sigterm.recv().fuse() => {
                    if signal.is_some() {
                        info!("received SIGTERM, shutting down");
                    }
                },
            };

            Ok::<_, Error>(())
        };

        // select requires Future + Unpin
        pin_mut!(future_server);
        pin_mut!(future_signal);

        match future::select(future_server, future_signal).await {
            Either::Left((result, _)) | Either::Right((result, _)) => result,
        }
    }

    /// Runs the server by creating a TCP listener and binding it to the
    /// configured socket address.
    async fn run_server(self) -> Result<()> {
        let socket_addr = self.options.socket_addr;
        let listener = TcpListener::bind(socket_addr)
            .await
            .context(BindTcpListenerSnafu { socket_addr })?;

        info!(server.address = %socket_addr, "serving SCEP requests");
        axum::serve(listener, self.router)
            .await
            .context(RunServerSnafu)
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use rstest::rstest;
    use scep_certs::CertificateAuthority;
    use tower::ServiceExt;
    use x509_cert::{Certificate, der::Decode};

    use super::*;
    use crate::signer::{
        SignError,
        tests::{RecordingSigner, request},
    };

    fn test_router(signer: RecordingSigner) -> (Router, Certificate) {
        let ca = CertificateAuthority::builder()
            .key_size(1024)
            .build()
            .unwrap();
        let ca_cert = ca.ca_cert().clone();
        let service = Service::new(ca, Arc::new(signer)).unwrap();

        (router(Arc::new(service)), ca_cert)
    }

    async fn call(router: Router, method: Method, uri: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, body.to_vec())
    }

    #[tokio::test]
    async fn get_ca_caps() {
        let (router, _) = test_router(RecordingSigner::default());
        let (status, body) = call(router, Method::GET, "/scep?operation=GetCACaps", vec![]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"Renewal\nSHA-256\nPOSTPKIOperation");
    }

    #[tokio::test]
    async fn get_ca_cert() {
        let (router, ca_cert) = test_router(RecordingSigner::default());
        let (status, body) = call(router, Method::GET, "/scep?operation=GetCACert", vec![]).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(Certificate::from_der(&body).unwrap(), ca_cert);
    }

    #[tokio::test]
    async fn pki_operation() {
        let (_, issued) = test_router(RecordingSigner::default());
        let (router, _) = test_router(RecordingSigner {
            certificate: Some(issued.clone()),
            ..Default::default()
        });

        let csr = request("device-1", None);
        let (status, body) = call(
            router,
            Method::POST,
            "/scep?operation=PKIOperation",
            csr.raw().to_vec(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(Certificate::from_der(&body).unwrap(), issued);
    }

    #[rstest]
    #[case(Method::GET, "/scep?operation=Unknown", StatusCode::BAD_REQUEST)]
    #[case(Method::GET, "/scep", StatusCode::BAD_REQUEST)]
    #[case(Method::GET, "/scep?operation=PKIOperation", StatusCode::METHOD_NOT_ALLOWED)]
    #[case(Method::POST, "/scep?operation=GetCACaps", StatusCode::METHOD_NOT_ALLOWED)]
    #[case(Method::POST, "/scep?operation=PKIOperation", StatusCode::BAD_REQUEST)]
    #[case(Method::GET, "/health", StatusCode::OK)]
    #[tokio::test]
    async fn status_codes(#[case] method: Method, #[case] uri: &str, #[case] expected: StatusCode) {
        let (router, _) = test_router(RecordingSigner::default());
        let (status, _) = call(router, method, uri, b"not a CSR".to_vec()).await;

        assert_eq!(status, expected);
    }

    #[tokio::test]
    async fn signing_failures_answer_500() {
        let (router, _) = test_router(RecordingSigner::default());
        let csr = request("device-1", None);
        let (status, _) = call(
            router,
            Method::POST,
            "/scep?operation=PKIOperation",
            csr.raw().to_vec(),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn policy_violations_answer_403() {
        let err = service::Error::Sign {
            source: SignError::ChallengeMismatch,
        };
        let response = ServiceError(err).into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
