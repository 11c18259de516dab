//! HTTP route definitions.

mod health;
mod sync;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(sync::routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use converge_engine::{
        BucketKey, Clock, ClockConfig, MemoryStorage, Message, NodeSummary, Replica, Timestamp,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const NOW: u64 = 1_704_067_200_000;

    fn app(state: AppState) -> Router {
        create_routes().with_state(state)
    }

    fn seeded(state: &AppState) -> Timestamp {
        let stamp = Timestamp::new(NOW, 0, "00000000000000bb");
        let mut replica = Replica::new(
            Clock::new("00000000000000aa", ClockConfig::default()).unwrap(),
            MemoryStorage::new(),
        );
        replica
            .apply(
                vec![Message::new("accounts", "a1", "name", json!("Checking"), stamp.clone())],
                NOW,
            )
            .unwrap();
        state.groups.insert("g1", replica);
        stamp
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health() {
        let state = test_state(None);
        seeded(&state);
        let response = app(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["groups"], 1);
    }

    #[tokio::test]
    async fn node_summary_of_loaded_group() {
        let state = test_state(None);
        seeded(&state);
        let expected = state.groups.get("g1").unwrap().lock().log().trie().hash();

        let response = app(state)
            .oneshot(post("/sync/g1/node", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let summary: NodeSummary = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(summary.hash, expected);
    }

    #[tokio::test]
    async fn timestamps_and_wanted_messages() {
        let state = test_state(None);
        let stamp = seeded(&state);
        let bucket = BucketKey::for_millis(NOW).to_string();

        let response = app(state.clone())
            .oneshot(post("/sync/g1/timestamps", json!({ "bucket": bucket })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await["timestamps"],
            json!([stamp.to_string()])
        );

        let response = app(state)
            .oneshot(post(
                "/sync/g1/messages",
                json!({ "bucket": bucket, "want": [stamp.to_string()] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["messages"][0]["value"], "Checking");
    }

    #[tokio::test]
    async fn malformed_batch_is_bad_request() {
        let state = test_state(None);
        seeded(&state);
        let response = app(state)
            .oneshot(post(
                "/sync/g1/messages",
                json!({
                    "bucket": BucketKey::for_millis(NOW).to_string(),
                    "messages": [{ "dataset": "accounts", "column": "name", "value": 1,
                                   "timestamp": "2024-01-01T00:00:00.000Z-0000-00000000000000cc" }]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_group_id_is_bad_request() {
        let response = app(test_state(None))
            .oneshot(post("/sync/bad.group/node", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn secret_protects_sync_routes() {
        let state = test_state(Some("s3cret"));
        seeded(&state);

        let response = app(state.clone())
            .oneshot(post("/sync/g1/node", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = post("/sync/g1/node", json!({}));
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
