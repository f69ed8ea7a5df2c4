//! API HTTP de bannissement
//!
//! `POST /guardian` avec `{"acao": "banir" | "desbanir", "ip": "a.b.c.d"}` et
//! l'en-tête `Authorization: Bearer <jeton>`.

use crate::models::{is_dotted_quad, BanOutcome, Persistence};
use crate::orchestrator::BanOrchestrator;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub acao: String,
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    /// Présent quand la règle est appliquée et qu'une base est configurée:
    /// vrai si le registre est à jour
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted: Option<bool>,
}

impl ApiResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            persisted: None,
        }
    }
}

type TokenDigest = [u8; 32];

fn token_digest(token: &str) -> TokenDigest {
    Sha256::digest(token.as_bytes()).into()
}

/// Le jeton n'est conservé que sous forme d'empreinte SHA-256. Un jeton vide
/// n'autorise aucune requête.
pub struct ApiState {
    orchestrator: BanOrchestrator,
    token: Option<TokenDigest>,
}

impl ApiState {
    pub fn new(orchestrator: BanOrchestrator, auth_token: &str) -> Self {
        Self {
            orchestrator,
            token: (!auth_token.is_empty()).then(|| token_digest(auth_token)),
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/guardian", post(guardian_action))
        .with_state(state)
}

/// Sert l'API jusqu'à ce que `shutdown` se termine
pub async fn serve<F>(state: Arc<ApiState>, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("écoute sur {} impossible", addr))?;
    info!("API en écoute sur http://{}/guardian", addr);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("arrêt inattendu du serveur HTTP")
}

/// Comparaison en temps constant des empreintes
fn authorized(headers: &HeaderMap, expected: Option<&TokenDigest>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let parts: Vec<&str> = value.split(' ').collect();
    if parts.len() != 2 || parts[0] != "Bearer" {
        return false;
    }
    let presented = token_digest(parts[1]);
    expected
        .iter()
        .zip(presented.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// `None` sans base configurée
fn persisted(outcome: &BanOutcome) -> Option<bool> {
    match outcome.persistence {
        Persistence::Skipped => None,
        Persistence::Failed(_) => Some(false),
        Persistence::Inserted
        | Persistence::Refreshed
        | Persistence::Deactivated
        | Persistence::NotRecorded => Some(true),
    }
}

async fn guardian_action(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Reply {
    if !authorized(&headers, state.token.as_ref()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::failure("Non autorisé")),
        );
    }

    let Json(request) = match payload {
        Ok(request) => request,
        Err(e) => {
            warn!("Requête invalide: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failure("Format de requête invalide")),
            );
        }
    };

    if request.acao.is_empty() || request.ip.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failure("Les champs 'acao' et 'ip' sont obligatoires")),
        );
    }
    if !is_dotted_quad(&request.ip) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failure(format!("Adresse IP invalide: {}", request.ip))),
        );
    }

    let (result, verb) = match request.acao.to_lowercase().as_str() {
        "banir" => (state.orchestrator.ban(&request.ip).await, "bannie"),
        "desbanir" => (state.orchestrator.unban(&request.ip).await, "débannie"),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failure(
                    "Action invalide, utilisez 'banir' ou 'desbanir'",
                )),
            )
        }
    };

    match result {
        Ok(outcome) => {
            let persisted = persisted(&outcome);
            let mut message = format!("IP {} {}", outcome.address, verb);
            match &outcome.persistence {
                Persistence::Failed(e) => {
                    message.push_str(&format!(" (registre non mis à jour: {})", e))
                }
                Persistence::Skipped => message.push_str(" (aucune base configurée)"),
                _ => {}
            }
            (
                StatusCode::OK,
                Json(ApiResponse {
                    success: true,
                    message,
                    persisted,
                }),
            )
        }
        Err(e) => {
            error!("Action {} échouée pour {}: {}", request.acao, request.ip, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failure(format!(
                    "Erreur lors du traitement de la requête: {}",
                    e
                ))),
            )
        }
    }
}
