use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::leads::Lead;

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
pub struct LeadQuery {
    /// Substring match on name, company, email and notes.
    pub q: Option<String>,
    pub size: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub source: Option<String>,
}

/// One element of a bulk upsert body. Only `name` is required.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeadInput {
    pub id: Option<String>,
    pub name: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub size: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct LeadList {
    #[schema(value_type = Vec<Lead>)]
    pub items: Vec<Lead>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UpsertSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub total: usize,
}
