//! AdmissionReview handlers
//!
//! Decodes AdmissionReview requests, runs the matching admission pass and
//! translates the result into an AdmissionResponse. Resolved pod priority
//! is returned to the API server as a JSON patch.

use std::sync::Arc;

use axum::{extract::State, Json};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionTarget, TargetKind, PLUGIN_NAME};
use crate::Error;

use super::WebhookState;

/// Handle mutating admission review: resolve pod priority
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

    Json(mutate(&state, &req).into_review())
}

/// Handle validating admission review: guard the default PriorityClass
pub async fn validate_handler(
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

    Json(validate(&state, &req).into_review())
}

/// Run the mutating pass for a single request
pub fn mutate(state: &WebhookState, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let uid = &request.uid;

    if !inspected_by(request, |kind| state.admission.mutates(kind)) {
        debug!(uid = %uid, resource = %request.resource.resource, "Not inspected by mutating pass, allowing unchanged");
        return AdmissionResponse::from(request);
    }

    let mut target = match decode(state, request) {
        Ok(target) => target,
        Err(e) => return reject(request, &e),
    };

    let original = match &target {
        AdmissionTarget::Pod(write) => write.pod.clone(),
        _ => return AdmissionResponse::from(request),
    };

    if let Err(e) = state.admission.admit(&mut target) {
        return reject(request, &e);
    }

    let AdmissionTarget::Pod(write) = &target else {
        return AdmissionResponse::from(request);
    };

    let patch_ops = build_patch_operations(&original, &write.pod);
    if patch_ops.is_empty() {
        debug!(uid = %uid, pod = ?write.pod.metadata.name, "Pod priority unchanged");
        return AdmissionResponse::from(request);
    }

    let spec = write.pod.spec.as_ref();
    info!(
        uid = %uid,
        namespace = %write.namespace,
        pod = ?write.pod.metadata.name,
        priority_class = ?spec.and_then(|s| s.priority_class_name.as_deref()),
        priority = ?spec.and_then(|s| s.priority),
        "Applying resolved priority to pod"
    );

    match AdmissionResponse::from(request).with_patch(json_patch::Patch(patch_ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Run the validating pass for a single request
pub fn validate(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    if !inspected_by(request, |kind| state.admission.validates(kind)) {
        debug!(uid = %request.uid, resource = %request.resource.resource, "Not inspected by validating pass, allowing unchanged");
        return AdmissionResponse::from(request);
    }

    let target = match decode(state, request) {
        Ok(target) => target,
        Err(e) => return reject(request, &e),
    };

    match state.admission.validate(&target) {
        Ok(()) => AdmissionResponse::from(request),
        Err(e) => reject(request, &e),
    }
}

fn inspected_by(
    request: &AdmissionRequest<DynamicObject>,
    pass: impl Fn(TargetKind) -> bool,
) -> bool {
    TargetKind::of(request).is_some_and(|(kind, _)| pass(kind))
}

/// Decode a request the pass will inspect; refused until the index has synced
fn decode(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<AdmissionTarget, Error> {
    if !state.readiness.has_synced() {
        return Err(Error::transient("not yet ready to handle request"));
    }
    AdmissionTarget::from_request(request)
}

/// Deny the request with a status matching the error category
fn reject(request: &AdmissionRequest<DynamicObject>, err: &Error) -> AdmissionResponse {
    let (code, reason) = match err {
        Error::Malformed { .. } => (400, "BadRequest"),
        Error::Forbidden { .. } => (403, "Forbidden"),
        _ => (500, "InternalError"),
    };

    warn!(
        uid = %request.uid,
        plugin = PLUGIN_NAME,
        resource = %request.resource.resource,
        name = %request.name,
        retryable = err.is_retryable(),
        error = %err,
        "Denying admission request"
    );

    let mut response = AdmissionResponse::from(request).deny(err.message());
    response.result.code = code;
    response.result.reason = reason.to_string();
    response
}

/// Build JSON patch operations carrying resolved priority fields onto the pod
fn build_patch_operations(original: &Pod, resolved: &Pod) -> Vec<json_patch::PatchOperation> {
    use json_patch::{AddOperation, PatchOperation};
    use jsonptr::PointerBuf;

    let Some(resolved) = resolved.spec.as_ref() else {
        return Vec::new();
    };
    let original = original.spec.as_ref();

    let mut ops = Vec::new();

    if let Some(name) = &resolved.priority_class_name {
        if original.and_then(|s| s.priority_class_name.as_ref()) != Some(name) {
            ops.push(PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens(["spec", "priorityClassName"]),
                value: serde_json::Value::String(name.clone()),
            }));
        }
    }

    if let Some(priority) = resolved.priority {
        if original.and_then(|s| s.priority) != Some(priority) {
            ops.push(PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens(["spec", "priority"]),
                value: serde_json::Value::from(priority),
            }));
        }
    }

    ops
}
