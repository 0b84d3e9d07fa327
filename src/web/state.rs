use crate::service::ServiceState;

/// Axum's shared state is just the service layer — there is no
/// session/template machinery at this edge (§6: JSON in, JSON out).
#[derive(Clone)]
pub struct AppState {
    pub service: ServiceState,
}
