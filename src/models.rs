use crate::geo::Coordinates;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============ Database Models ============

/// A captured sales lead.
///
/// The contact email is the natural key: ingesting the same email twice
/// updates the existing lead instead of creating a second one.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lead {
    /// Stable identifier.
    pub id: Uuid,
    /// Contact email, lowercased. Natural key.
    pub email: String,
    /// Vertical / industry tag ("branch"), e.g. "solar".
    pub vertical: String,
    /// Normalized postal code (e.g. "8011AA").
    pub postcode: Option<String>,
    /// Cached latitude once the postcode has been geocoded.
    pub lat: Option<f64>,
    /// Cached longitude once the postcode has been geocoded.
    pub lng: Option<f64>,
    /// Contact name.
    pub name: Option<String>,
    /// Contact phone, E.164 when it could be normalized.
    pub phone: Option<String>,
    /// Free-form interest fields captured by the form.
    pub interests: serde_json::Value,
    /// How many batches have received this lead.
    pub total_distribution_count: i32,
    /// How many distinct customers have received this lead.
    pub unique_customers_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Lead {
    /// Cached coordinates, if the lead has been geocoded before.
    pub fn coordinates(&self) -> Option<Coordinates> {
        Coordinates::from_parts(self.lat, self.lng)
    }
}

/// Geographic area a batch accepts leads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Territory {
    /// No geographic restriction.
    FullCountry,
    /// Leads within `radius_km` of `center`. A missing center makes the
    /// batch ineligible for every lead.
    Radius {
        center: Option<Coordinates>,
        radius_km: f64,
    },
    /// Named provinces or numeric postcode prefixes.
    Regions { regions: Vec<String> },
}

impl Territory {
    pub fn kind(&self) -> TerritoryKind {
        match self {
            Territory::FullCountry => TerritoryKind::FullCountry,
            Territory::Radius { .. } => TerritoryKind::Radius,
            Territory::Regions { .. } => TerritoryKind::Regions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerritoryKind {
    FullCountry,
    Radius,
    Regions,
}

impl TerritoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerritoryKind::FullCountry => "full_country",
            TerritoryKind::Radius => "radius",
            TerritoryKind::Regions => "regions",
        }
    }
}

/// Raw `customer_batches` row. Converted into [`CustomerBatch`] so the
/// territory columns become a proper sum type.
#[derive(Debug, Clone, FromRow)]
pub struct CustomerBatchRow {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub vertical: String,
    pub total_batch_size: i32,
    pub current_batch_count: i32,
    pub is_active: bool,
    pub territory_type: String,
    pub center_lat: Option<f64>,
    pub center_lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub regions: Vec<String>,
    pub destination: serde_json::Value,
}

/// One customer's standing order for leads in one vertical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerBatch {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub vertical: String,
    /// Purchased capacity.
    pub total_batch_size: i32,
    /// Filled so far. Never exceeds `total_batch_size`.
    pub current_batch_count: i32,
    pub is_active: bool,
    pub territory: Territory,
    /// Where accepted leads are written. Opaque to the engine.
    pub destination: serde_json::Value,
}

impl CustomerBatch {
    pub fn has_capacity(&self) -> bool {
        self.current_batch_count < self.total_batch_size
    }

    pub fn remaining(&self) -> i32 {
        (self.total_batch_size - self.current_batch_count).max(0)
    }
}

impl TryFrom<CustomerBatchRow> for CustomerBatch {
    type Error = String;

    fn try_from(row: CustomerBatchRow) -> Result<Self, Self::Error> {
        let territory = match row.territory_type.as_str() {
            "full_country" => Territory::FullCountry,
            "radius" => {
                let radius_km = row
                    .radius_km
                    .filter(|r| r.is_finite() && *r >= 0.0)
                    .ok_or_else(|| format!("batch {} has radius territory without radius_km", row.id))?;
                Territory::Radius {
                    center: Coordinates::from_parts(row.center_lat, row.center_lng),
                    radius_km,
                }
            }
            "regions" => Territory::Regions {
                regions: row.regions,
            },
            other => {
                return Err(format!(
                    "batch {} has unknown territory type '{}'",
                    row.id, other
                ))
            }
        };

        Ok(Self {
            id: row.id,
            customer_id: row.customer_id,
            vertical: row.vertical,
            total_batch_size: row.total_batch_size,
            current_batch_count: row.current_batch_count,
            is_active: row.is_active,
            territory,
            destination: row.destination,
        })
    }
}

/// Fact record: a lead was delivered to a customer through a batch.
/// Unique per (lead, customer); never updated or deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Distribution {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub customer_id: Uuid,
    pub batch_id: Uuid,
    /// Why this batch matched (the candidate's reason at commit time).
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

// ============ Engine Models ============

/// Machine-readable reason a batch was not eligible for a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    NoCapacity,
    AlreadyReceived,
    LeadNotGeocoded,
    BatchHasNoCenter,
    OutsideRadius,
    LeadHasNoPostcode,
    OutsideRegions,
}

/// Transient evaluation of one (lead, batch) pair. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub customer_id: Uuid,
    pub batch_id: Uuid,
    pub territory: TerritoryKind,
    /// Lower wins. `None` when the candidate is not eligible.
    pub priority_score: Option<f64>,
    pub distance_km: Option<f64>,
    pub eligible: bool,
    /// Human-readable match or rejection reason.
    pub reason: String,
    pub rejection: Option<RejectionCode>,
}

/// Whether a distribution decision writes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMode {
    Simulate,
    #[default]
    Commit,
}

impl DistributionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionMode::Simulate => "simulate",
            DistributionMode::Commit => "commit",
        }
    }
}
