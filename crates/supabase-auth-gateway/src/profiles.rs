//! PostgREST-backed profile store.
//!
//! Tables: `profiles` (base row, keyed by `id`), `business_profiles` and
//! `influencer_profiles` (keyed by `profile_id`). A read embeds both role
//! tables in one request.

use crate::error::GatewayError;
use crate::http::{read_json, response_error};
use crate::identity::SupabaseIdentityProvider;
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use session_sync_core::{
    BaseRecord, BusinessDetails, InfluencerDetails, ProfileRow, ProfileStore, ProfileStoreError,
    ProfileStoreResult, Role, RoleDetails,
};
use std::sync::Arc;
use tracing::debug;

const PROFILES_TABLE: &str = "profiles";

const PROFILE_SELECT: &str =
    "id,role,email,full_name,avatar_url,phone,business_profiles(*),influencer_profiles(*)";

/// Role-specific table for `role`.
pub fn role_table(role: Role) -> Option<&'static str> {
    match role {
        Role::Business => Some("business_profiles"),
        Role::Influencer => Some("influencer_profiles"),
        Role::Admin => None,
    }
}

/// One row of the joined select.
#[derive(Debug, Deserialize)]
struct ProfileRowWire {
    #[serde(flatten)]
    base: BaseRecord,
    #[serde(default, deserialize_with = "embedded")]
    business_profiles: Option<BusinessDetails>,
    #[serde(default, deserialize_with = "embedded")]
    influencer_profiles: Option<InfluencerDetails>,
}

impl From<ProfileRowWire> for ProfileRow {
    fn from(wire: ProfileRowWire) -> Self {
        ProfileRow {
            base: wire.base,
            business: wire.business_profiles,
            influencer: wire.influencer_profiles,
        }
    }
}

/// PostgREST embeds a one-to-one relation as an object, or as an array
/// when it cannot prove uniqueness.
fn embedded<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(record)) => Some(record),
        Some(OneOrMany::Many(records)) => records.into_iter().next(),
    })
}

fn first_row(rows: Vec<ProfileRowWire>) -> ProfileStoreResult<ProfileRow> {
    rows.into_iter()
        .next()
        .map(ProfileRow::from)
        .ok_or(ProfileStoreError::NotFound)
}

fn with_profile_id(subject_id: &str, fields: Map<String, Value>) -> Map<String, Value> {
    let mut body = fields;
    body.insert("profile_id".into(), Value::String(subject_id.to_string()));
    body
}

/// Profile store that shares the identity provider's client and tokens.
pub struct SupabaseProfileStore {
    identity: Arc<SupabaseIdentityProvider>,
}

impl SupabaseProfileStore {
    pub fn new(identity: Arc<SupabaseIdentityProvider>) -> Self {
        Self { identity }
    }

    async fn authorized(&self, builder: RequestBuilder) -> ProfileStoreResult<RequestBuilder> {
        let token = self
            .identity
            .access_token()
            .await
            .map_err(|e| ProfileStoreError::Backend(e.to_string()))?;
        Ok(builder
            .header("apikey", self.identity.publishable_key())
            .header("Authorization", format!("Bearer {}", token)))
    }

    /// Send a write and discard the (minimal) response.
    async fn send_write(&self, builder: RequestBuilder, context: &str) -> ProfileStoreResult<()> {
        let response = self
            .authorized(builder)
            .await?
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(GatewayError::from)?;

        if !response.status().is_success() {
            return Err(response_error(response, context).await.into());
        }
        Ok(())
    }

    /// Insert or merge the role row for `subject_id`.
    async fn upsert_role_row(
        &self,
        subject_id: &str,
        role: Role,
        fields: Map<String, Value>,
    ) -> ProfileStoreResult<()> {
        let table = role_table(role).ok_or_else(|| {
            ProfileStoreError::Backend(format!("role {role} has no role-specific table"))
        })?;
        let url = format!("{}?on_conflict=profile_id", self.identity.rest_url(table));
        debug!(subject_id, table, "Writing role-specific profile row");

        let builder = self
            .identity
            .http_client()
            .post(&url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&with_profile_id(subject_id, fields));
        self.send_write(builder, "Role-specific profile write failed")
            .await
    }
}

#[async_trait]
impl ProfileStore for SupabaseProfileStore {
    async fn read_profile(&self, subject_id: &str) -> ProfileStoreResult<ProfileRow> {
        let url = self.identity.rest_url(PROFILES_TABLE);
        debug!(subject_id, "Fetching profile from Supabase");

        let builder = self.identity.http_client().get(&url).query(&[
            ("id", format!("eq.{subject_id}")),
            ("select", PROFILE_SELECT.to_string()),
            ("limit", "1".to_string()),
        ]);
        let response = self
            .authorized(builder)
            .await?
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(GatewayError::from)?;

        if !response.status().is_success() {
            return Err(response_error(response, "Failed to fetch profile").await.into());
        }

        let rows: Vec<ProfileRowWire> = read_json(response).await?;
        first_row(rows)
    }

    async fn insert_base(&self, record: &BaseRecord) -> ProfileStoreResult<()> {
        debug!(subject_id = %record.id, role = %record.role, "Inserting base profile row");
        let builder = self
            .identity
            .http_client()
            .post(self.identity.rest_url(PROFILES_TABLE))
            .header("Prefer", "return=minimal")
            .json(record);
        self.send_write(builder, "Base profile insert failed").await
    }

    async fn insert_role_record(
        &self,
        subject_id: &str,
        details: &RoleDetails,
    ) -> ProfileStoreResult<()> {
        self.upsert_role_row(subject_id, details.role(), details.to_map())
            .await
    }

    async fn update_base(
        &self,
        subject_id: &str,
        fields: &Map<String, Value>,
    ) -> ProfileStoreResult<()> {
        debug!(subject_id, fields = fields.len(), "Updating base profile row");
        let builder = self
            .identity
            .http_client()
            .patch(self.identity.rest_url(PROFILES_TABLE))
            .query(&[("id", format!("eq.{subject_id}"))])
            .header("Prefer", "return=minimal")
            .json(fields);
        self.send_write(builder, "Base profile update failed").await
    }

    async fn update_role_record(
        &self,
        subject_id: &str,
        role: Role,
        fields: &Map<String, Value>,
    ) -> ProfileStoreResult<()> {
        self.upsert_role_row(subject_id, role, fields.clone()).await
    }
}
