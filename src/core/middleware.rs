use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::board::error::BoardError;

/// Header carrying the tenant resolved by the upstream gateway.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant scope of a request. Authentication happens upstream; this service
/// only trusts the resolved id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Self::new)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = BoardError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<TenantContext>() {
            return Ok(*ctx);
        }
        Self::from_headers(&parts.headers)
            .ok_or_else(|| BoardError::Unauthorized("Tenant context required".to_string()))
    }
}
