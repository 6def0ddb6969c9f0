//! Pod Mutation Webhook
//!
//! Handles AdmissionReview requests for Pod resources.

use std::sync::Arc;

use axum::{extract::State, Json};
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject,
};
use tracing::error;

use super::WebhookState;

/// Handle mutating admission review for Pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = state.injector.admit(&req).into_response(&req);
    Json(response.into_review())
}
