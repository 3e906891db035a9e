use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notes beyond this count are dropped during merge.
pub const MAX_NOTES: usize = 5;

/// Apartment sizes the backend understands. Serialized variant names match
/// the wire values expected by the preferences endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApartmentType {
    Studio,
    OneBed,
    TwoBeds,
    ThreeOrMoreBeds,
}

impl ApartmentType {
    /// Human-readable label used in budget guidance copy.
    pub fn readable(self) -> &'static str {
        match self {
            ApartmentType::Studio => "studio",
            ApartmentType::OneBed => "1 bedroom apartment",
            ApartmentType::TwoBeds => "2 bedroom apartment",
            ApartmentType::ThreeOrMoreBeds => "3+ bedroom apartment",
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            ApartmentType::Studio => "Studio",
            ApartmentType::OneBed => "OneBed",
            ApartmentType::TwoBeds => "TwoBeds",
            ApartmentType::ThreeOrMoreBeds => "ThreeOrMoreBeds",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TourType {
    OnSite,
    Virtual,
}

/// Accumulated wizard answers. Every field stays optional while editing; the
/// submission builder enforces the required subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighborhood_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighborhood_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apartment_type: Option<ApartmentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_in_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tour_type: Option<TourType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_accepted: Option<bool>,
}

impl FormData {
    /// Merge a step's partial output; `Some` fields override, `None` fields
    /// leave the accumulated value untouched.
    pub fn merge(&mut self, patch: FormData) {
        let FormData {
            neighborhood_id,
            neighborhood_name,
            apartment_type,
            budget,
            move_in_date,
            name,
            email,
            phone_number,
            tour_type,
            notes,
            terms_accepted,
        } = patch;

        merge_field(&mut self.neighborhood_id, neighborhood_id);
        merge_field(&mut self.neighborhood_name, neighborhood_name);
        merge_field(&mut self.apartment_type, apartment_type);
        merge_field(&mut self.budget, budget);
        merge_field(&mut self.move_in_date, move_in_date);
        merge_field(&mut self.name, name);
        merge_field(&mut self.email, email);
        merge_field(&mut self.phone_number, phone_number);
        merge_field(&mut self.tour_type, tour_type);
        merge_field(&mut self.terms_accepted, terms_accepted);

        if let Some(mut notes) = notes {
            notes.truncate(MAX_NOTES);
            self.notes = Some(notes);
        }
    }

    /// Apartment-type selection pair driving the price-range dependency.
    pub fn selection_key(&self) -> Option<(String, ApartmentType)> {
        match (&self.neighborhood_id, self.apartment_type) {
            (Some(id), Some(kind)) => Some((id.clone(), kind)),
            _ => None,
        }
    }

    /// Reactive contact-step validity: recomputed on every edit, so step 5
    /// membership in the completed set can be revoked.
    pub fn contact_complete(&self) -> bool {
        let name_ok = self
            .name
            .as_deref()
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false);
        let email_ok = match self.email.as_deref() {
            None => true,
            Some(e) if e.trim().is_empty() => true,
            Some(e) => is_valid_email(e),
        };
        let phone_ok = self
            .phone_number
            .as_deref()
            .map(|p| sanitize_phone_number(p).is_ok())
            .unwrap_or(false);

        name_ok
            && email_ok
            && phone_ok
            && self.tour_type.is_some()
            && self.terms_accepted == Some(true)
    }

    /// Build the outbound payload, enforcing the fields required at final
    /// submission and normalizing the phone number to E.164.
    pub fn submission_payload(&self, origin: &str) -> Result<SubmissionPayload, FormError> {
        let name = self
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or(FormError::MissingField("name"))?;
        let phone_raw = self
            .phone_number
            .as_deref()
            .ok_or(FormError::MissingField("phoneNumber"))?;
        let phone_number = sanitize_phone_number(phone_raw)?;
        let tour_type = self.tour_type.ok_or(FormError::MissingField("tourType"))?;
        if self.terms_accepted != Some(true) {
            return Err(FormError::MissingField("termsAccepted"));
        }
        let neighborhood_id = self
            .neighborhood_id
            .clone()
            .ok_or(FormError::MissingField("neighborhoodId"))?;
        let apartment_type = self
            .apartment_type
            .ok_or(FormError::MissingField("apartmentType"))?;
        let budget = self.budget.ok_or(FormError::MissingField("budget"))?;
        if budget == 0 {
            return Err(FormError::InvalidBudget);
        }
        let move_in_date = self
            .move_in_date
            .ok_or(FormError::MissingField("moveInDate"))?;

        let email = match self.email.as_deref() {
            None => None,
            Some(e) if e.trim().is_empty() => None,
            Some(e) if is_valid_email(e) => Some(e.to_string()),
            Some(_) => return Err(FormError::InvalidEmail),
        };

        Ok(SubmissionPayload {
            client: ClientPayload {
                id: Uuid::new_v4(),
                name,
                email,
                phone_number,
                // The backend expects client notes empty; free-form notes
                // travel with the preferences instead.
                notes: Vec::new(),
            },
            origin_name: origin.to_string(),
            preferences: PreferencesPayload {
                neighborhood_id,
                apartment_type,
                budget,
                move_in_date,
                tour_type,
                notes: self.notes.clone().unwrap_or_default(),
            },
        })
    }
}

fn merge_field<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Shape the external backend accepts at `POST /api/v1/clients/public`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionPayload {
    pub client: ClientPayload,
    pub origin_name: String,
    pub preferences: PreferencesPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientPayload {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub phone_number: String,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferencesPayload {
    pub neighborhood_id: String,
    pub apartment_type: ApartmentType,
    pub budget: u32,
    pub move_in_date: NaiveDate,
    pub tour_type: TourType,
    pub notes: Vec<String>,
}

/// Validation failures surfaced inline next to the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("required field missing: {0}")]
    MissingField(&'static str),
    #[error("invalid phone number format, use international format with + prefix")]
    InvalidPhone,
    #[error("please enter a valid email address")]
    InvalidEmail,
    #[error("budget must be a positive amount")]
    InvalidBudget,
}

/// Strip common formatting characters and validate the result as E.164
/// (`+[1-9]` followed by 1 to 14 digits).
pub fn sanitize_phone_number(raw: &str) -> Result<String, FormError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    if is_e164(&cleaned) {
        Ok(cleaned)
    } else {
        Err(FormError::InvalidPhone)
    }
}

pub fn is_e164(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('+') else {
        return false;
    };
    let bytes = digits.as_bytes();
    (2..=15).contains(&bytes.len())
        && bytes[0] != b'0'
        && bytes.iter().all(|b| b.is_ascii_digit())
}

/// Basic shape check: one `@`, non-empty local and domain parts, a dot in
/// the domain, no whitespace anywhere.
pub fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = value.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .split('.')
        .filter(|segment| !segment.is_empty())
        .count()
        >= 2
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_form() -> FormData {
        FormData {
            neighborhood_id: Some("d1".to_string()),
            neighborhood_name: Some("Downtown".to_string()),
            apartment_type: Some(ApartmentType::OneBed),
            budget: Some(2000),
            move_in_date: NaiveDate::from_ymd_opt(2025, 6, 1),
            name: Some("Jordan Reyes".to_string()),
            email: Some("jordan@example.com".to_string()),
            phone_number: Some("+1 (555) 123-4567".to_string()),
            tour_type: Some(TourType::OnSite),
            notes: None,
            terms_accepted: Some(true),
        }
    }

    #[test]
    fn merge_overrides_only_present_fields() {
        let mut form = complete_form();
        form.merge(FormData {
            budget: Some(2500),
            ..FormData::default()
        });
        assert_eq!(form.budget, Some(2500));
        assert_eq!(form.name.as_deref(), Some("Jordan Reyes"));
    }

    #[test]
    fn merge_caps_notes_at_five() {
        let mut form = FormData::default();
        form.merge(FormData {
            notes: Some((0..8).map(|i| format!("note {i}")).collect()),
            ..FormData::default()
        });
        assert_eq!(form.notes.as_ref().map(Vec::len), Some(MAX_NOTES));
    }

    #[test]
    fn sanitize_normalizes_formatted_numbers() {
        assert_eq!(
            sanitize_phone_number("+1 (555) 123-4567").expect("valid"),
            "+15551234567"
        );
        assert!(sanitize_phone_number("555-1234").is_err());
        assert!(sanitize_phone_number("+0555123456").is_err());
        assert!(sanitize_phone_number("+1").is_err());
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a@.co"));
    }

    #[test]
    fn contact_completion_is_revocable() {
        let mut form = complete_form();
        assert!(form.contact_complete());
        form.email = Some("not-an-email".to_string());
        assert!(!form.contact_complete());
        // Email is optional when blank.
        form.email = None;
        assert!(form.contact_complete());
        form.terms_accepted = Some(false);
        assert!(!form.contact_complete());
    }

    #[test]
    fn submission_requires_the_fixed_subset() {
        let mut form = complete_form();
        form.budget = None;
        let err = form.submission_payload("Organic").expect_err("rejected");
        assert_eq!(err, FormError::MissingField("budget"));
    }

    #[test]
    fn submission_payload_matches_wire_shape() {
        let payload = complete_form()
            .submission_payload("Organic")
            .expect("payload builds");
        assert_eq!(payload.client.phone_number, "+15551234567");
        assert!(payload.client.notes.is_empty());
        assert_eq!(payload.origin_name, "Organic");
        assert_eq!(payload.preferences.budget, 2000);

        let value = serde_json::to_value(&payload).expect("serializes");
        assert_eq!(value["preferences"]["apartment_type"], "OneBed");
        assert_eq!(value["preferences"]["move_in_date"], "2025-06-01");
        assert_eq!(value["preferences"]["tour_type"], "OnSite");
    }
}
