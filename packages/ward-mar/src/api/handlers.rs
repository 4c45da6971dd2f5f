use super::error::ApiResult;
use crate::administration::{
    AdministerRequest, AdministrationEvent, AdministrationSlot, AdministrationTarget,
};
use crate::audit::SignedAction;
use crate::consult::{ConsultantOrder, NewConsultantOrder};
use crate::log::API;
use crate::order::{NewOrder, TreatmentOrder};
use crate::{ConsultantOrderId, OrderId, PatientId, SlotId, Ward, VERSION};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(flatten)]
    pub order: NewOrder,
    pub signed_by: SignedAction,
}

#[derive(Debug, Deserialize)]
pub struct DiscontinueRequest {
    #[serde(default)]
    pub reason: String,
    pub signed_by: SignedAction,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub signed_by: SignedAction,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    /// Ward day, defaults to today
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health(State(ward): State<Ward>) -> ApiResult<Json<Health>> {
    ward.ping().await?;
    Ok(Json(Health {
        status: "ok",
        version: VERSION,
    }))
}

pub async fn create_order(
    State(ward): State<Ward>,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<TreatmentOrder>)> {
    debug!(target: API, msg = "Create order", patient_id = %request.order.patient_id);
    let order = ward
        .orders
        .create_order(request.order, request.signed_by)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(ward): State<Ward>,
    Path(order_id): Path<OrderId>,
) -> ApiResult<Json<TreatmentOrder>> {
    Ok(Json(ward.orders.get_order(order_id).await?))
}

pub async fn list_patient_orders(
    State(ward): State<Ward>,
    Path(patient_id): Path<PatientId>,
) -> ApiResult<Json<Vec<TreatmentOrder>>> {
    Ok(Json(ward.orders.list_patient_orders(patient_id).await?))
}

pub async fn discontinue_order(
    State(ward): State<Ward>,
    Path(order_id): Path<OrderId>,
    Json(request): Json<DiscontinueRequest>,
) -> ApiResult<Json<TreatmentOrder>> {
    debug!(target: API, msg = "Discontinue order", %order_id);
    let order = ward
        .orders
        .discontinue_order(order_id, request.reason, request.signed_by)
        .await?;
    Ok(Json(order))
}

pub async fn get_slots(
    State(ward): State<Ward>,
    Path(order_id): Path<OrderId>,
    Query(query): Query<SlotsQuery>,
) -> ApiResult<Json<Vec<AdministrationSlot>>> {
    let date = query
        .date
        .unwrap_or_else(|| ward.clock().date_of(Utc::now()));
    Ok(Json(ward.tracker.get_todays_slots(order_id, date).await?))
}

pub async fn list_events(
    State(ward): State<Ward>,
    Path(order_id): Path<OrderId>,
) -> ApiResult<Json<Vec<AdministrationEvent>>> {
    Ok(Json(ward.tracker.list_events(order_id).await?))
}

pub async fn administer_slot(
    State(ward): State<Ward>,
    Path(slot_id): Path<SlotId>,
    Json(request): Json<AdministerRequest>,
) -> ApiResult<(StatusCode, Json<AdministrationEvent>)> {
    debug!(target: API, msg = "Administer slot", %slot_id);
    let event = ward
        .tracker
        .administer(AdministrationTarget::Slot(slot_id), request)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn administer_prn(
    State(ward): State<Ward>,
    Path(order_id): Path<OrderId>,
    Json(request): Json<AdministerRequest>,
) -> ApiResult<(StatusCode, Json<AdministrationEvent>)> {
    debug!(target: API, msg = "Administer PRN", %order_id);
    let event = ward
        .tracker
        .administer(AdministrationTarget::Prn(order_id), request)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn create_consultant_order(
    State(ward): State<Ward>,
    Json(request): Json<NewConsultantOrder>,
) -> ApiResult<(StatusCode, Json<ConsultantOrder>)> {
    let order = ward
        .acknowledgements
        .create_consultant_order(request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_consultant_order(
    State(ward): State<Ward>,
    Path(order_id): Path<ConsultantOrderId>,
) -> ApiResult<Json<ConsultantOrder>> {
    Ok(Json(
        ward.acknowledgements.get_consultant_order(order_id).await?,
    ))
}

pub async fn list_pending_consultant_orders(
    State(ward): State<Ward>,
    Path(patient_id): Path<PatientId>,
) -> ApiResult<Json<Vec<ConsultantOrder>>> {
    Ok(Json(ward.acknowledgements.list_pending(patient_id).await?))
}

pub async fn acknowledge_consultant_order(
    State(ward): State<Ward>,
    Path(order_id): Path<ConsultantOrderId>,
    Json(request): Json<AcknowledgeRequest>,
) -> ApiResult<Json<ConsultantOrder>> {
    debug!(target: API, msg = "Acknowledge consultant order", %order_id);
    let order = ward
        .acknowledgements
        .acknowledge(order_id, request.signed_by)
        .await?;
    Ok(Json(order))
}
