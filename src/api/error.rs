// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared error type for the HTTP API, rendered as RFC 7807
//! `application/problem+json` (spec section 6).

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::dispatcher::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("target {0:?} not found")]
    TargetNotFound(String),
    #[error("invalid match_type {0:?}")]
    InvalidMatchType(String),
    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),
    #[error("destination address is not permitted: {0}")]
    DestinationNotPermitted(String),
    #[error("parameter {field} out of range: {detail}")]
    ParamOutOfRange { field: &'static str, detail: String },
    #[error("concurrency limit reached for this target")]
    ConcurrencyLimit,
    #[error("collector not registered")]
    CollectorNotRegistered,
    #[error("collector busy")]
    CollectorBusy,
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::ConcurrencyLimit => ApiError::ConcurrencyLimit,
            DispatchError::CollectorNotRegistered => ApiError::CollectorNotRegistered,
            DispatchError::CollectorBusy => ApiError::CollectorBusy,
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::TargetNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidMatchType(_)
            | ApiError::InvalidPrefix(_)
            | ApiError::DestinationNotPermitted(_)
            | ApiError::ParamOutOfRange { .. } => StatusCode::BAD_REQUEST,
            ApiError::ConcurrencyLimit => StatusCode::TOO_MANY_REQUESTS,
            ApiError::CollectorNotRegistered | ApiError::CollectorBusy => StatusCode::BAD_GATEWAY,
        }
    }

    fn problem_type(&self) -> &'static str {
        match self {
            ApiError::TargetNotFound(_) => "about:blank#target-not-found",
            ApiError::InvalidMatchType(_) => "about:blank#invalid-match-type",
            ApiError::InvalidPrefix(_) => "about:blank#invalid-prefix",
            ApiError::DestinationNotPermitted(_) => "about:blank#destination-not-permitted",
            ApiError::ParamOutOfRange { .. } => "about:blank#param-out-of-range",
            ApiError::ConcurrencyLimit => "about:blank#concurrency-limit",
            ApiError::CollectorNotRegistered => "about:blank#collector-not-registered",
            ApiError::CollectorBusy => "about:blank#collector-busy",
        }
    }
}

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    kind: &'static str,
    title: String,
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    invalid_params: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let invalid_params = match &self {
            ApiError::InvalidMatchType(_) => Some(vec!["match_type".to_string()]),
            ApiError::InvalidPrefix(_) => Some(vec!["prefix".to_string()]),
            ApiError::DestinationNotPermitted(_) => Some(vec!["destination".to_string()]),
            ApiError::ParamOutOfRange { field, .. } => Some(vec![field.to_string()]),
            _ => None,
        };
        let retry_after = matches!(self, ApiError::ConcurrencyLimit).then_some(1u64);

        let body = ProblemDetails {
            kind: self.problem_type(),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: self.to_string(),
            invalid_params,
            retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        response
            .headers_mut()
            .insert("content-type", "application/problem+json".parse().unwrap());
        if let Some(secs) = retry_after {
            if let Ok(v) = secs.to_string().parse() {
                response.headers_mut().insert("retry-after", v);
            }
        }
        response
    }
}
