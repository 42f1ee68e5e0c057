/**
 * API REST FLOWGATE - Serveur HTTP du service d'admission
 *
 * RÔLE :
 * Expose la façade de la politique aux planificateurs et clients de
 * transfert : soumission et suivi des transferts, dépôt des nettoyages,
 * inspection des ressources, statistiques et variables globales.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum avec middleware auth API key (header x-api-key)
 * - Routes REST : /transfers, /cleanups, /resources, /statistics,
 *   /variables/{name}
 * - Erreurs métier traduites en statuts HTTP (400, 404, 500)
 *
 * UTILITÉ DANS FLOWGATE :
 * 🎯 Interface des planificateurs de workflows
 * 🎯 Inspection d'état en temps réel pour le debug du site
 */

use crate::entity::{Cleanup, Transfer};
use crate::facade::{PolicyError, PolicyFacade};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check toujours accessible
    if path.starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("FLOWGATE_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        eprintln!("SECURITY: FLOWGATE_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<PolicyFacade>,
}

fn to_status(e: &PolicyError) -> StatusCode {
    match e {
        PolicyError::Validation(_) => StatusCode::BAD_REQUEST,
        PolicyError::NotFound(_) | PolicyError::GlobalNotFound(_) => StatusCode::NOT_FOUND,
        PolicyError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(e: PolicyError) -> (StatusCode, Json<serde_json::Value>) {
    let status = to_status(&e);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        eprintln!("[http] ❌ {e}");
    }
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

type Reply<T> = Result<Json<T>, (StatusCode, Json<serde_json::Value>)>;

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/transfers", get(list_transfers).post(add_transfer))
        .route(
            "/transfers/{id}",
            get(get_transfer)
                .put(update_transfer)
                .delete(remove_transfer),
        )
        .route("/cleanups", get(list_cleanups).post(add_cleanup))
        .route(
            "/cleanups/{id}",
            get(get_cleanup).put(update_cleanup).delete(remove_cleanup),
        )
        .route("/resources", get(list_resources))
        .route("/statistics", get(get_statistics))
        .route("/variables/{name}", get(get_variable).put(set_variable))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// GET /transfers (liste triée)
async fn list_transfers(State(app): State<AppState>) -> Json<Vec<Transfer>> {
    Json(app.facade.list_transfers().await)
}

// POST /transfers (soumission, rend la version avisée)
async fn add_transfer(
    State(app): State<AppState>,
    Json(transfer): Json<Transfer>,
) -> Reply<Transfer> {
    app.facade
        .add_transfer(transfer)
        .await
        .map(Json)
        .map_err(reject)
}

// GET /transfers/{id}
async fn get_transfer(State(app): State<AppState>, Path(id): Path<String>) -> Reply<Transfer> {
    app.facade.get_transfer(&id).await.map(Json).map_err(reject)
}

// PUT /transfers/{id} (mise à jour, STATUS terminal inclus)
async fn update_transfer(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(mut transfer): Json<Transfer>,
) -> Reply<Transfer> {
    transfer.id = Some(id);
    app.facade
        .update_transfer(transfer)
        .await
        .map(Json)
        .map_err(reject)
}

// DELETE /transfers/{id}
async fn remove_transfer(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Reply<Transfer> {
    app.facade
        .remove_transfer(&id)
        .await
        .map(Json)
        .map_err(reject)
}

// GET /cleanups
async fn list_cleanups(State(app): State<AppState>) -> Json<Vec<Cleanup>> {
    Json(app.facade.list_cleanups().await)
}

// POST /cleanups (202 si la demande est retenue)
async fn add_cleanup(
    State(app): State<AppState>,
    Json(cleanup): Json<Cleanup>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<serde_json::Value>)> {
    match app.facade.add_cleanup(cleanup).await {
        Ok(Some(cleanup)) => Ok((
            StatusCode::OK,
            Json(serde_json::to_value(cleanup).unwrap_or_default()),
        )),
        Ok(None) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "withheld" })),
        )),
        Err(e) => Err(reject(e)),
    }
}

// GET /cleanups/{id}
async fn get_cleanup(State(app): State<AppState>, Path(id): Path<String>) -> Reply<Cleanup> {
    app.facade.get_cleanup(&id).await.map(Json).map_err(reject)
}

// PUT /cleanups/{id}
async fn update_cleanup(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(mut cleanup): Json<Cleanup>,
) -> Reply<Cleanup> {
    cleanup.id = Some(id);
    app.facade
        .update_cleanup(cleanup)
        .await
        .map(Json)
        .map_err(reject)
}

// DELETE /cleanups/{id}
async fn remove_cleanup(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Reply<Cleanup> {
    app.facade
        .remove_cleanup(&id)
        .await
        .map(Json)
        .map_err(reject)
}

// GET /resources (ressources encore référencées)
async fn list_resources(
    State(app): State<AppState>,
) -> Json<Vec<crate::entity::Resource>> {
    Json(app.facade.list_resources().await)
}

// GET /statistics
async fn get_statistics(
    State(app): State<AppState>,
) -> Json<crate::stats::StatisticsSnapshot> {
    Json(app.facade.statistics())
}

// GET /variables/{name}
async fn get_variable(State(app): State<AppState>, Path(name): Path<String>) -> Reply<f64> {
    app.facade
        .get_variable(&name)
        .await
        .map(Json)
        .map_err(reject)
}

// PUT /variables/{name} (corps : nombre brut)
async fn set_variable(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(value): Json<f64>,
) -> Reply<serde_json::Value> {
    app.facade
        .set_variable(&name, value)
        .await
        .map(|()| Json(serde_json::json!({ "status": "set", "name": name, "value": value })))
        .map_err(reject)
}
