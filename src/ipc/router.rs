use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: [TryHandle; 16] = [
    handlers::core::try_handle,
    handlers::auth::try_handle,
    handlers::students::try_handle,
    handlers::teachers::try_handle,
    handlers::classes::try_handle,
    handlers::subjects::try_handle,
    handlers::parents::try_handle,
    handlers::users::try_handle,
    handlers::relations::try_handle,
    handlers::assignments::try_handle,
    handlers::report_cards::try_handle,
    handlers::attendance::try_handle,
    handlers::grades::try_handle,
    handlers::teacher::try_handle,
    handlers::parent::try_handle,
    handlers::records::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for family in FAMILIES {
        if let Some(resp) = family(state, &req) {
            return resp;
        }
    }

    tracing::debug!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
