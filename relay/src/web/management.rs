//! Management API used by the Trello Power-Up.
//!
//! Every call carries a Trello `token` and `card`; the identity check turns the
//! pair into an owner (`"{username}@trello"`) and all reads and writes are
//! scoped to that owner.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::identity::IdentityError;
use crate::recent::RecentLogError;
use crate::routing::{EndpointSummary, EndpointUpdate, NewEndpoint, StoreError};
use crate::sink::TRELLO_COMMENT_KIND;
use crate::util::{generate_address, is_valid_address};
use crate::web::AppState;

/// Filter stored when the caller leaves it blank.
const DEFAULT_FILTER: &str = ".";

#[derive(Error, Debug)]
pub enum ManagementError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("address '{0}' is not owned by this member")]
    NotOwned(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    RecentLog(#[from] RecentLogError),
}

impl From<ManagementError> for (StatusCode, String) {
    fn from(err: ManagementError) -> Self {
        match err {
            ManagementError::Identity(_) => (StatusCode::UNAUTHORIZED, err.to_string()),
            ManagementError::InvalidBody(_) | ManagementError::InvalidAddress(_) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ManagementError::NotOwned(_) => (StatusCode::FORBIDDEN, err.to_string()),
            ManagementError::Store(StoreError::AddressTaken(_)) => {
                (StatusCode::CONFLICT, err.to_string())
            }
            ManagementError::Store(StoreError::NotFound) => {
                (StatusCode::FORBIDDEN, "endpoint not found or not owned".to_string())
            }
            ManagementError::Store(StoreError::Database(e)) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ManagementError::RecentLog(e) => {
                tracing::error!("Recent log error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        }
    }
}

/// `?card=&token=`
#[derive(Debug, Deserialize)]
pub struct CardQuery {
    #[serde(default)]
    pub card: String,
    #[serde(default)]
    pub token: String,
}

/// `?address=&card=&token=`
#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub card: String,
    #[serde(default)]
    pub token: String,
}

/// Body of `PUT /trello/card`. Without `address` a new endpoint is created.
#[derive(Debug, Deserialize)]
pub struct SetCardRequest {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, rename = "newAddress")]
    pub new_address: Option<String>,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub card: String,
    #[serde(default)]
    pub token: String,
}

async fn verify(state: &AppState, token: &str, card: &str) -> Result<String, ManagementError> {
    state.identity.verify(token, card).await.map_err(|e| {
        warn!(card = %card, error = %e, "trello_identity_rejected");
        ManagementError::Identity(e)
    })
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// `GET /trello/card` - endpoints owned by the caller that target the card.
pub async fn get_card(
    State(state): State<AppState>,
    Query(query): Query<CardQuery>,
) -> Result<Json<Vec<EndpointSummary>>, (StatusCode, String)> {
    let owner = verify(&state, &query.token, &query.card).await?;

    let endpoints = state
        .endpoints
        .list_for_target(&query.card, &owner)
        .await
        .map_err(ManagementError::from)?;

    Ok(Json(endpoints))
}

/// `PUT /trello/card` - create or update an endpoint; returns its address.
pub async fn set_card(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<String>, (StatusCode, String)> {
    let request: SetCardRequest = serde_json::from_slice(&body)
        .map_err(|e| ManagementError::InvalidBody(e.to_string()))?;

    let owner = verify(&state, &request.token, &request.card).await?;

    let filter = if request.filter.trim().is_empty() {
        DEFAULT_FILTER.to_string()
    } else {
        request.filter
    };
    let data = json!({ "token": request.token });

    let address = match present(request.address) {
        None => {
            let address = present(request.new_address)
                .unwrap_or_else(|| generate_address(&mut rand::thread_rng()));
            if !is_valid_address(&address) {
                return Err(ManagementError::InvalidAddress(address).into());
            }

            state
                .endpoints
                .create(NewEndpoint {
                    address: address.clone(),
                    owner: owner.clone(),
                    kind: TRELLO_COMMENT_KIND.to_string(),
                    target: request.card.clone(),
                    filter,
                    data,
                })
                .await
                .map_err(ManagementError::from)?;

            info!(address = %address, owner = %owner, card = %request.card, "endpoint_created");
            address
        }
        Some(current) => {
            let new_address = present(request.new_address).unwrap_or_else(|| current.clone());
            if !is_valid_address(&new_address) {
                return Err(ManagementError::InvalidAddress(new_address).into());
            }

            state
                .endpoints
                .update(EndpointUpdate {
                    address: current.clone(),
                    new_address: new_address.clone(),
                    owner: owner.clone(),
                    target: request.card.clone(),
                    filter,
                    data,
                })
                .await
                .map_err(ManagementError::from)?;

            info!(
                address = %current,
                new_address = %new_address,
                owner = %owner,
                card = %request.card,
                "endpoint_updated"
            );
            new_address
        }
    };

    if let Some(base) = &state.config.service_url {
        info!(url = %format!("{}/w/{}", base.trim_end_matches('/'), address), "endpoint_url");
    }

    Ok(Json(address))
}

/// `DELETE /trello/card` - remove an owned endpoint.
pub async fn delete_card(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<StatusCode, (StatusCode, String)> {
    let owner = verify(&state, &query.token, &query.card).await?;

    state
        .endpoints
        .delete(&query.address, &owner)
        .await
        .map_err(ManagementError::from)?;

    info!(address = %query.address, owner = %owner, "endpoint_deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /trello/card/requests` - last payloads received on an owned address.
///
/// Payloads that no longer parse as JSON come back as `null`. With the log
/// disabled the list is always empty.
pub async fn card_requests(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<Vec<Value>>, (StatusCode, String)> {
    let owner = verify(&state, &query.token, &query.card).await?;

    let owned = state
        .endpoints
        .list_for_target(&query.card, &owner)
        .await
        .map_err(ManagementError::from)?
        .iter()
        .any(|e| e.address == query.address);
    if !owned {
        return Err(ManagementError::NotOwned(query.address).into());
    }

    let Some(recent) = &state.recent else {
        return Ok(Json(Vec::new()));
    };

    let payloads = recent
        .recent(&query.address)
        .await
        .map_err(ManagementError::from)?;

    Ok(Json(
        payloads
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap_or(Value::Null))
            .collect(),
    ))
}
