mod error;
mod handlers;

use crate::Ward;
use axum::routing::{get, post};
use axum::Router;

pub use error::{ApiError, ApiResult};

pub fn router(ward: Ward) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/orders", post(handlers::create_order))
        .route("/orders/:order_id", get(handlers::get_order))
        .route(
            "/orders/:order_id/discontinue",
            post(handlers::discontinue_order),
        )
        .route("/orders/:order_id/slots", get(handlers::get_slots))
        .route("/orders/:order_id/events", get(handlers::list_events))
        .route("/orders/:order_id/administer", post(handlers::administer_prn))
        .route("/slots/:slot_id/administer", post(handlers::administer_slot))
        .route(
            "/patients/:patient_id/orders",
            get(handlers::list_patient_orders),
        )
        .route(
            "/patients/:patient_id/consultant-orders",
            get(handlers::list_pending_consultant_orders),
        )
        .route(
            "/consultant-orders",
            post(handlers::create_consultant_order),
        )
        .route(
            "/consultant-orders/:order_id",
            get(handlers::get_consultant_order),
        )
        .route(
            "/consultant-orders/:order_id/acknowledge",
            post(handlers::acknowledge_consultant_order),
        )
        .with_state(ward)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::InMemoryProgressNotes;
    use crate::test_helpers::{full_ward, today, AlwaysAllow, AlwaysDeny};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeDelta, Utc};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn signed_by(at: impl serde::Serialize) -> Value {
        json!({
            "user_id": Uuid::new_v4(),
            "at": at,
            "signature": "sig-nurse",
        })
    }

    fn order_body(patient_id: Uuid, frequency: &str) -> Value {
        json!({
            "patient_id": patient_id,
            "medication_name": "Amoxicillin",
            "dosage": "500 mg",
            "route": "ORAL",
            "frequency": frequency,
            "start_date": "2024-03-14T00:00:00Z",
            "is_prn": frequency == "PRN",
            "signed_by": signed_by("2024-03-14T08:00:00Z"),
        })
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);

        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }

    #[tokio::test]
    async fn health_reports_version() {
        let router = router(full_ward(Arc::new(AlwaysAllow)));
        let (status, body) = send(&router, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn order_is_created_scheduled_and_administered() {
        let notes = Arc::new(InMemoryProgressNotes::default());
        let router = router(full_ward(notes.clone()));
        let patient_id = Uuid::new_v4();

        let (status, order) = send(
            &router,
            "POST",
            "/orders",
            Some(order_body(patient_id, "TDS")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["status"], "ACTIVE");
        assert_eq!(order["frequency"], "TDS");

        let order_id = order["id"].as_str().unwrap().to_string();

        let (status, slots) = send(
            &router,
            "GET",
            &format!("/orders/{order_id}/slots?date=2024-03-14"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let slots = slots.as_array().unwrap().clone();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0]["scheduled_time"], "2024-03-14T06:00:00Z");

        let slot_id = slots[0]["id"].as_str().unwrap().to_string();
        let administer = json!({ "signed_by": signed_by("2024-03-14T06:10:00Z") });

        // no progress note yet
        let (status, body) = send(
            &router,
            "POST",
            &format!("/slots/{slot_id}/administer"),
            Some(administer.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
        assert_eq!(body["kind"], "BlockedByMissingProgressNote");

        notes.record(patient_id, today()).await;

        let (status, event) = send(
            &router,
            "POST",
            &format!("/slots/{slot_id}/administer"),
            Some(administer.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(event["slot_id"], slot_id.as_str());

        let (status, body) = send(
            &router,
            "POST",
            &format!("/slots/{slot_id}/administer"),
            Some(administer),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "InvalidSlotState");

        let (status, events) = send(
            &router,
            "GET",
            &format!("/orders/{order_id}/events"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(events.as_array().unwrap().len(), 1);

        let (status, orders) = send(
            &router,
            "GET",
            &format!("/patients/{patient_id}/orders"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(orders[0]["id"], order_id.as_str());
    }

    #[tokio::test]
    async fn invalid_order_lists_every_field() {
        let router = router(full_ward(Arc::new(AlwaysAllow)));

        let mut body = order_body(Uuid::new_v4(), "BD");
        body["medication_name"] = json!("");
        body["dosage"] = json!("");

        let (status, body) = send(&router, "POST", "/orders", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "ValidationError");

        let names = body["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["medication_name", "dosage"]);
    }

    #[tokio::test]
    async fn unknown_frequency_is_a_bad_request() {
        let router = router(full_ward(Arc::new(AlwaysAllow)));

        let (status, body) = send(
            &router,
            "POST",
            "/orders",
            Some(order_body(Uuid::new_v4(), "Q5H")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidFrequencyCode");
    }

    #[tokio::test]
    async fn discontinued_order_refuses_prn_dose() {
        let router = router(full_ward(Arc::new(AlwaysAllow)));

        let (_, order) = send(
            &router,
            "POST",
            "/orders",
            Some(order_body(Uuid::new_v4(), "PRN")),
        )
        .await;
        let order_id = order["id"].as_str().unwrap().to_string();

        let administer = json!({
            "signed_by": signed_by("2024-03-14T09:00:00Z"),
            "remarks": "Pain 6/10",
        });

        let (status, event) = send(
            &router,
            "POST",
            &format!("/orders/{order_id}/administer"),
            Some(administer.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(event["slot_id"], Value::Null);

        let (status, order) = send(
            &router,
            "POST",
            &format!("/orders/{order_id}/discontinue"),
            Some(json!({
                "reason": "No longer required",
                "signed_by": signed_by("2024-03-14T10:00:00Z"),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["status"], "DISCONTINUED");

        let (status, body) = send(
            &router,
            "POST",
            &format!("/orders/{order_id}/administer"),
            Some(administer),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "InvalidTransition");
    }

    #[tokio::test]
    async fn gate_denial_applies_to_prn_doses() {
        let router = router(full_ward(Arc::new(AlwaysDeny)));

        let (_, order) = send(
            &router,
            "POST",
            "/orders",
            Some(order_body(Uuid::new_v4(), "PRN")),
        )
        .await;
        let order_id = order["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &router,
            "POST",
            &format!("/orders/{order_id}/administer"),
            Some(json!({ "signed_by": signed_by("2024-03-14T09:00:00Z") })),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
        assert_eq!(body["kind"], "BlockedByMissingProgressNote");
    }

    #[tokio::test]
    async fn consultant_order_is_acknowledged_once() {
        let router = router(full_ward(Arc::new(AlwaysAllow)));
        let patient_id = Uuid::new_v4();

        let (status, order) = send(
            &router,
            "POST",
            "/consultant-orders",
            Some(json!({
                "patient_id": patient_id,
                "order_type": "Cardiology",
                "details": "Repeat ECG in the morning",
                "priority": "URGENT",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["status"], "PENDING");

        let order_id = order["id"].as_str().unwrap().to_string();

        let (_, pending) = send(
            &router,
            "GET",
            &format!("/patients/{patient_id}/consultant-orders"),
            None,
        )
        .await;
        assert_eq!(pending.as_array().unwrap().len(), 1);

        let acknowledge = json!({ "signed_by": signed_by(Utc::now() + TimeDelta::minutes(5)) });

        let (status, acknowledged) = send(
            &router,
            "POST",
            &format!("/consultant-orders/{order_id}/acknowledge"),
            Some(acknowledge.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(acknowledged["status"], "ACKNOWLEDGED");

        let (status, body) = send(
            &router,
            "POST",
            &format!("/consultant-orders/{order_id}/acknowledge"),
            Some(acknowledge),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "AlreadyAcknowledged");

        let (_, pending) = send(
            &router,
            "GET",
            &format!("/patients/{patient_id}/consultant-orders"),
            None,
        )
        .await;
        assert!(pending.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn slots_outside_supported_years_are_invalid() {
        let router = router(full_ward(Arc::new(AlwaysAllow)));

        let (_, order) = send(
            &router,
            "POST",
            "/orders",
            Some(order_body(Uuid::new_v4(), "TDS")),
        )
        .await;
        let order_id = order["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &router,
            "GET",
            &format!("/orders/{order_id}/slots?date=1800-01-01"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["fields"][0]["name"], "date");
    }

    #[tokio::test]
    async fn overlong_course_is_invalid() {
        let router = router(full_ward(Arc::new(AlwaysAllow)));

        let mut body = order_body(Uuid::new_v4(), "TDS");
        body["duration_days"] = json!(i32::MAX);

        let (status, body) = send(&router, "POST", "/orders", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["fields"][0]["name"], "duration_days");
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let router = router(full_ward(Arc::new(AlwaysAllow)));

        let (status, body) = send(
            &router,
            "GET",
            &format!("/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "NotFound");

        let (status, _) = send(
            &router,
            "GET",
            &format!("/consultant-orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
