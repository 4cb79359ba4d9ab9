use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A child whose policy is being enforced.
///
/// Children, families and their accounts are owned by the persistence layer;
/// the enforcement core only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Child {
    pub id: Uuid,
    pub family_id: Uuid,
    pub name: String,
    pub birth_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Child {
    pub fn age_on(&self, date: NaiveDate) -> u32 {
        age_on(self.birth_date, date)
    }

    /// The slice of child data handed to adapters.
    pub fn meta(&self, today: NaiveDate) -> ChildMeta {
        ChildMeta {
            child_id: self.id,
            name: self.name.clone(),
            age: self.age_on(today),
        }
    }
}

/// Child metadata passed to an adapter's `enforce_policy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildMeta {
    pub child_id: Uuid,
    pub name: String,
    pub age: u32,
}

/// Input for creating a child record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChildInput {
    pub family_id: Uuid,
    pub name: String,
    pub birth_date: NaiveDate,
}

/// Whole years elapsed from `birth_date` to `date`. Birth dates in the
/// future yield zero.
pub fn age_on(birth_date: NaiveDate, date: NaiveDate) -> u32 {
    if date <= birth_date {
        return 0;
    }
    let mut years = date.year() - birth_date.year();
    if (date.month(), date.day()) < (birth_date.month(), birth_date.day()) {
        years -= 1;
    }
    years.max(0) as u32
}
