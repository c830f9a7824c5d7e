use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};

/// Path answered by the health responder.
pub const HELLO_PATH: &str = "/hello";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloResponse {
    pub status: String,
    pub node: String,
}

async fn hello_handler(State(node): State<Arc<str>>) -> Json<HelloResponse> {
    Json(HelloResponse {
        status: "ok".into(),
        node: node.to_string(),
    })
}

/// Router for the health responder of `node_name`.
pub fn build_router(node_name: &str) -> Router {
    Router::new()
        .route(HELLO_PATH, get(hello_handler))
        .with_state(Arc::<str>::from(node_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn hello_endpoint() {
        let response = build_router("worker-1")
            .oneshot(Request::builder().uri(HELLO_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let hello: HelloResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(hello.status, "ok");
        assert_eq!(hello.node, "worker-1");
    }

    #[tokio::test]
    async fn unknown_path() {
        let response = build_router("worker-1")
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
