use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    dto::leads::{LeadInput, LeadList, LeadQuery, UpsertSummary},
    error::{AppError, AppResult},
    leads::{Lead, LeadStore},
    middleware::auth::{AuthUser, ensure_admin},
    response::{ApiResponse, Meta},
};

pub async fn list_leads(
    store: &LeadStore,
    user: &AuthUser,
    query: LeadQuery,
) -> AppResult<ApiResponse<LeadList>> {
    ensure_admin(user)?;
    let items = filter_leads(store.load().await?, &query);
    let total = items.len() as i64;
    Ok(ApiResponse::success(
        "Leads",
        LeadList { items },
        Some(Meta::new(1, total, total)),
    ))
}

pub async fn upsert_leads(
    store: &LeadStore,
    user: &AuthUser,
    body: Value,
) -> AppResult<ApiResponse<UpsertSummary>> {
    ensure_admin(user)?;
    let (inputs, skipped) = parse_inputs(body)?;
    let now = Utc::now();

    let summary = store
        .update(|leads| {
            let mut summary = merge_leads(leads, inputs, now);
            summary.skipped = skipped;
            summary
        })
        .await?;

    tracing::info!(
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        "leads upserted"
    );
    Ok(ApiResponse::success("Leads saved", summary, Some(Meta::empty())))
}

/// Equality filters ignore case and surrounding whitespace; empty values are ignored.
pub fn filter_leads(leads: Vec<Lead>, query: &LeadQuery) -> Vec<Lead> {
    let needle = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    leads
        .into_iter()
        .filter(|lead| {
            field_matches(&lead.size, &query.size)
                && field_matches(&lead.industry, &query.industry)
                && field_matches(&lead.location, &query.location)
                && field_matches(&lead.status, &query.status)
                && field_matches(&lead.source, &query.source)
        })
        .filter(|lead| match &needle {
            None => true,
            Some(needle) => [
                Some(&lead.name),
                lead.company.as_ref(),
                lead.email.as_ref(),
                lead.notes.as_ref(),
            ]
            .into_iter()
            .flatten()
            .any(|text| text.to_lowercase().contains(needle.as_str())),
        })
        .collect()
}

fn field_matches(value: &Option<String>, wanted: &Option<String>) -> bool {
    let Some(wanted) = wanted.as_deref().map(str::trim).filter(|w| !w.is_empty()) else {
        return true;
    };
    value
        .as_deref()
        .is_some_and(|v| same_text(v, wanted))
}

/// Case-insensitive comparison that also folds non-ASCII letters.
fn same_text(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Splits a bulk body into usable inputs and a count of skipped elements.
pub fn parse_inputs(body: Value) -> AppResult<(Vec<LeadInput>, usize)> {
    let Value::Array(items) = body else {
        return Err(AppError::BadRequest("Expected an array of leads".into()));
    };

    let total = items.len();
    let inputs: Vec<LeadInput> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<LeadInput>(item).ok())
        .filter(|input| !input.name.trim().is_empty())
        .collect();

    if inputs.is_empty() {
        return Err(AppError::BadRequest(
            "No valid leads: every lead needs a name".into(),
        ));
    }
    let skipped = total - inputs.len();
    Ok((inputs, skipped))
}

/// Matches by `id` first, then by case-insensitive name.
pub fn merge_leads(
    leads: &mut Vec<Lead>,
    inputs: Vec<LeadInput>,
    now: DateTime<Utc>,
) -> UpsertSummary {
    let mut summary = UpsertSummary::default();

    for input in inputs {
        let name = input.name.trim().to_string();
        let position = input
            .id
            .as_deref()
            .and_then(|id| leads.iter().position(|lead| lead.id == id))
            .or_else(|| {
                leads
                    .iter()
                    .position(|lead| same_text(&lead.name, &name))
            });

        match position {
            Some(index) => {
                let lead = &mut leads[index];
                lead.name = name;
                overwrite(&mut lead.company, input.company);
                overwrite(&mut lead.email, input.email);
                overwrite(&mut lead.phone, input.phone);
                overwrite(&mut lead.size, input.size);
                overwrite(&mut lead.industry, input.industry);
                overwrite(&mut lead.location, input.location);
                overwrite(&mut lead.status, input.status);
                overwrite(&mut lead.source, input.source);
                overwrite(&mut lead.notes, input.notes);
                lead.updated_at = Some(now);
                summary.updated += 1;
            }
            None => {
                leads.push(Lead {
                    id: input
                        .id
                        .filter(|id| !id.trim().is_empty())
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    name,
                    company: input.company,
                    email: input.email,
                    phone: input.phone,
                    size: input.size,
                    industry: input.industry,
                    location: input.location,
                    status: input.status.or_else(|| Some("new".to_string())),
                    source: input.source,
                    notes: input.notes,
                    created_at: Some(now),
                    updated_at: Some(now),
                });
                summary.created += 1;
            }
        }
    }

    summary.total = leads.len();
    summary
}

fn overwrite(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}
