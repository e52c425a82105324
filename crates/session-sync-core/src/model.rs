//! Session and profile data model.
//!
//! A [`Profile`] is assembled from one base record plus at most one
//! role-specific record. The role decides which record is joined; the
//! other one is never read into the profile even when the store has it.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Opaque identity-provider session as seen by the core.
///
/// Tokens stay inside the provider; only the subject and some display
/// metadata cross into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Value,
}

impl Session {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: None,
            expires_at: None,
            metadata: Value::Null,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Account role. Decides which role-specific record a profile joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Business,
    Influencer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Business => "business",
            Role::Influencer => "influencer",
            Role::Admin => "admin",
        }
    }

    /// Writable columns of this role's specific record.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Role::Business => BusinessDetails::COLUMNS,
            Role::Influencer => InfluencerDetails::COLUMNS,
            Role::Admin => &[],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "business" => Ok(Role::Business),
            "influencer" => Ok(Role::Influencer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Columns shared by every account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl BaseFields {
    pub const COLUMNS: &'static [&'static str] = &["email", "full_name", "avatar_url", "phone"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl BusinessDetails {
    pub const COLUMNS: &'static [&'static str] =
        &["company_name", "industry", "website", "description", "location"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfluencerDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub niche: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follower_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instagram_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiktok_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_channel: Option<String>,
}

impl InfluencerDetails {
    pub const COLUMNS: &'static [&'static str] = &[
        "bio",
        "niche",
        "location",
        "follower_count",
        "instagram_handle",
        "tiktok_handle",
        "youtube_channel",
    ];
}

/// Role-specific record, tagged by the role it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RoleDetails {
    Business(BusinessDetails),
    Influencer(InfluencerDetails),
}

impl RoleDetails {
    pub fn role(&self) -> Role {
        match self {
            RoleDetails::Business(_) => Role::Business,
            RoleDetails::Influencer(_) => Role::Influencer,
        }
    }

    /// Empty record for `role`, or `None` for roles without one.
    pub fn empty_for(role: Role) -> Option<Self> {
        match role {
            Role::Business => Some(RoleDetails::Business(BusinessDetails::default())),
            Role::Influencer => Some(RoleDetails::Influencer(InfluencerDetails::default())),
            Role::Admin => None,
        }
    }

    /// Columns as a flat JSON object.
    pub fn to_map(&self) -> Map<String, Value> {
        match self {
            RoleDetails::Business(details) => to_object(details),
            RoleDetails::Influencer(details) => to_object(details),
        }
    }

    fn merged(&self, fields: &Map<String, Value>) -> SyncResult<Self> {
        Ok(match self {
            RoleDetails::Business(details) => RoleDetails::Business(merge_fields(details, fields)?),
            RoleDetails::Influencer(details) => {
                RoleDetails::Influencer(merge_fields(details, fields)?)
            }
        })
    }
}

/// The base row as stored: identity columns plus shared fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRecord {
    pub id: String,
    pub role: Role,
    #[serde(flatten)]
    pub fields: BaseFields,
}

/// Result of one joined read: the base row and whichever role rows exist.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRow {
    pub base: BaseRecord,
    pub business: Option<BusinessDetails>,
    pub influencer: Option<InfluencerDetails>,
}

impl ProfileRow {
    pub fn new(base: BaseRecord) -> Self {
        Self {
            base,
            business: None,
            influencer: None,
        }
    }
}

/// Application-level user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub subject_id: String,
    pub role: Role,
    pub base: BaseFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<RoleDetails>,
}

impl Profile {
    /// Build a profile from a joined row, keeping only the record that
    /// matches the base row's role.
    pub fn assemble(row: ProfileRow) -> Self {
        let details = match row.base.role {
            Role::Business => row.business.map(RoleDetails::Business),
            Role::Influencer => row.influencer.map(RoleDetails::Influencer),
            Role::Admin => None,
        };

        Self {
            subject_id: row.base.id,
            role: row.base.role,
            base: row.base.fields,
            details,
        }
    }

    /// Check that the joined record belongs to the profile's role.
    pub fn validate(&self) -> SyncResult<()> {
        match &self.details {
            Some(details) if details.role() != self.role => {
                Err(SyncError::RoleMismatch(self.role.to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn business(&self) -> Option<&BusinessDetails> {
        match &self.details {
            Some(RoleDetails::Business(details)) => Some(details),
            _ => None,
        }
    }

    pub fn influencer(&self) -> Option<&InfluencerDetails> {
        match &self.details {
            Some(RoleDetails::Influencer(details)) => Some(details),
            _ => None,
        }
    }

    /// Role fields flattened over the base fields, with `id` and `role`.
    pub fn flattened(&self) -> Map<String, Value> {
        let mut map = to_object(&self.base);
        if let Some(details) = &self.details {
            map.extend(details.to_map());
        }
        map.insert("id".into(), Value::String(self.subject_id.clone()));
        map.insert("role".into(), Value::String(self.role.to_string()));
        map
    }

    /// Merge base-column values into this profile.
    pub fn apply_base(&mut self, fields: &Map<String, Value>) -> SyncResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.base = merge_fields(&self.base, fields)?;
        Ok(())
    }

    /// Merge role-column values into this profile, creating the record if
    /// it was not provisioned yet.
    pub fn apply_role(&mut self, fields: &Map<String, Value>) -> SyncResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let current = match self.details.take().or_else(|| RoleDetails::empty_for(self.role)) {
            Some(details) => details,
            None => {
                let field = fields.keys().next().cloned().unwrap_or_default();
                return Err(SyncError::UnknownField(field));
            }
        };
        match current.merged(fields) {
            Ok(merged) => {
                self.details = Some(merged);
                Ok(())
            }
            Err(e) => {
                self.details = Some(current);
                Err(e)
            }
        }
    }
}

/// A key/value patch against a profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    fields: Map<String, Value>,
}

/// A patch routed to the two records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitUpdate {
    pub base: Map<String, Value>,
    pub role_specific: Map<String, Value>,
}

impl ProfileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Route every key to the base or the role record.
    ///
    /// Fails on the first key that belongs to neither, before anything is
    /// written.
    pub fn split(&self, role: Role) -> SyncResult<SplitUpdate> {
        let mut split = SplitUpdate::default();
        for (key, value) in &self.fields {
            if BaseFields::COLUMNS.contains(&key.as_str()) {
                split.base.insert(key.clone(), value.clone());
            } else if role.columns().contains(&key.as_str()) {
                split.role_specific.insert(key.clone(), value.clone());
            } else {
                return Err(SyncError::UnknownField(key.clone()));
            }
        }
        Ok(split)
    }
}

/// Email and password for the identity provider.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Profile data collected at sign-up. The role follows from `details`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpProfile {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub details: RoleDetails,
}

impl SignUpProfile {
    pub fn role(&self) -> Role {
        self.details.role()
    }

    /// Provider metadata attached to the new account.
    pub fn metadata(&self) -> Value {
        let mut map = Map::new();
        map.insert("role".into(), Value::String(self.role().to_string()));
        if let Some(name) = &self.full_name {
            map.insert("full_name".into(), Value::String(name.clone()));
        }
        Value::Object(map)
    }

    /// Base row for the account.
    pub fn base_record(&self, subject_id: &str, email: &str) -> BaseRecord {
        BaseRecord {
            id: subject_id.to_string(),
            role: self.role(),
            fields: BaseFields {
                email: Some(email.to_string()),
                full_name: self.full_name.clone(),
                avatar_url: None,
                phone: self.phone.clone(),
            },
        }
    }
}

fn to_object<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Overlay `fields` onto `target`, checking each value against the
/// column's type.
fn merge_fields<T>(target: &T, fields: &Map<String, Value>) -> SyncResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut object = to_object(target);
    for (key, value) in fields {
        object.insert(key.clone(), value.clone());
        serde_json::from_value::<T>(Value::Object(object.clone())).map_err(|e| {
            SyncError::InvalidValue {
                field: key.clone(),
                message: e.to_string(),
            }
        })?;
    }
    serde_json::from_value(Value::Object(object)).map_err(|e| SyncError::InvalidValue {
        field: fields.keys().cloned().collect::<Vec<_>>().join(","),
        message: e.to_string(),
    })
}
